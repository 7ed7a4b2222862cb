//! scope-collect - Collect Threads posts and their engagement metrics
//!
//! Writes the run to `<data_dir>/posts.json` and merges it into the CSV
//! backup `<data_dir>/threads_data.csv`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use libthreadscope::api::ThreadsClient;
use libthreadscope::collector::{CollectMode, Collector};
use libthreadscope::config::Config;
use libthreadscope::logging::{self, LogFormat, LoggingConfig};
use libthreadscope::secrets::SecretStore;
use libthreadscope::sink::{read_snapshot, CsvBackupSink, JsonSnapshotSink, Sink};
use libthreadscope::{PostRecord, ThreadscopeError};

#[derive(Parser, Debug)]
#[command(name = "scope-collect")]
#[command(version)]
#[command(about = "Collect Threads posts and their engagement metrics", long_about = None)]
#[command(after_help = r#"MODES:
    normal - only posts newer than the latest one in the CSV backup (default)
    force  - every post
    test   - at most --limit posts (default: output.test_limit)

EXIT CODES:
    0 - Success
    1 - Configuration, credential or I/O error
    2 - Authentication or decryption failure
    3 - Invalid input
"#)]
struct Cli {
    /// Which posts to collect
    #[arg(long, value_enum, default_value_t = Mode::Normal)]
    mode: Mode,

    /// Post limit in test mode
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Only write the JSON snapshot, leave the CSV backup untouched
    #[arg(long)]
    skip_export: bool,

    /// Merge records from a JSON snapshot into the CSV backup without calling the API
    #[arg(long, value_name = "FILE", conflicts_with = "skip_export")]
    from_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Test,
    Force,
    Normal,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    LoggingConfig::new(
        cli.log_format.unwrap_or_else(logging::format_from_env),
        logging::level_from_env(),
        cli.verbose,
    )
    .with_error_log_dir(config.output.data_dir().join("logs"))
    .init();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Collection aborted: {:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<ThreadscopeError>()
            .map(ThreadscopeError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let mode = collect_mode(&cli, &config)?;
    let data_dir = config.output.data_dir();

    if let Some(path) = &cli.from_json {
        return import_snapshot(path, &data_dir).await;
    }

    // Credential problems surface here, before any request is made
    let store = SecretStore::from_config(&config.storage)?;
    let client = ThreadsClient::from_store(&store, &config.api)?;
    drop(store);

    let mut collector = Collector::new(client, &config.output)?;
    let records = collector.collect(mode).await?;
    if records.is_empty() {
        println!("No posts to process, existing output left untouched");
        return Ok(());
    }
    println!("Collected {} posts", records.len());

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(JsonSnapshotSink::in_dir(&data_dir))];
    if cli.skip_export {
        println!("Skipped CSV backup (--skip-export)");
    } else {
        sinks.push(Box::new(CsvBackupSink::in_dir(&data_dir)));
    }

    publish_all(&mut sinks, &records).await
}

fn collect_mode(cli: &Cli, config: &Config) -> Result<CollectMode> {
    if cli.limit == Some(0) {
        return Err(
            ThreadscopeError::InvalidInput("--limit must be greater than zero".to_string()).into(),
        );
    }

    if cli.limit.is_some() && cli.mode != Mode::Test {
        tracing::warn!("--limit only applies to test mode, ignoring it");
    }

    Ok(match cli.mode {
        Mode::Test => CollectMode::Test {
            limit: cli.limit.unwrap_or(config.output.test_limit),
        },
        Mode::Force => CollectMode::Force,
        Mode::Normal => CollectMode::Normal,
    })
}

async fn import_snapshot(path: &Path, data_dir: &Path) -> Result<()> {
    tracing::info!("Importing records from {:?}", path);
    let records =
        read_snapshot(path).with_context(|| format!("Failed to import {}", path.display()))?;

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvBackupSink::in_dir(data_dir))];
    publish_all(&mut sinks, &records).await?;

    println!("Imported {} posts from {}", records.len(), path.display());
    Ok(())
}

async fn publish_all(sinks: &mut [Box<dyn Sink>], records: &[PostRecord]) -> Result<()> {
    for sink in sinks.iter_mut() {
        sink.publish(records)
            .await
            .with_context(|| format!("Failed to publish to {}", sink.name()))?;
        tracing::debug!("Published {} records to {}", records.len(), sink.name());
    }
    Ok(())
}

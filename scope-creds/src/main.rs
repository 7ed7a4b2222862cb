//! scope-creds - Manage Threadscope's sealed credentials
//!
//! The encryption key and the sealed credential file live where the
//! configuration (or `CRYPTO_KEY_PATH` / `CREDENTIALS_PATH`) says.

use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libthreadscope::api::ThreadsClient;
use libthreadscope::config::{resolve_config_path, Config};
use libthreadscope::logging::{self, LoggingConfig};
use libthreadscope::secrets::{
    generate_key, Credentials, GoogleServiceAccount, SecretStore, GOOGLE_CREDENTIALS,
    REQUIRED_CREDENTIALS, SPREADSHEET_ID, THREADS_TOKEN,
};
use libthreadscope::ThreadscopeError;
use serde_json::Value;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "scope-creds")]
#[command(version)]
#[command(about = "Manage Threadscope credentials securely", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the encryption key
    Keygen {
        /// Replace an existing key (credentials sealed with it become unreadable)
        #[arg(long)]
        force: bool,
    },

    /// Store the Threads token, spreadsheet id and Google service account
    Setup {
        /// Read one JSON object with all three credentials from stdin (for automation)
        #[arg(long)]
        stdin: bool,
    },

    /// Check that every credential is present and well-formed
    Verify {
        /// Skip checking the token against the Threads API
        #[arg(long)]
        offline: bool,
    },

    /// List stored credential names (values are never shown)
    List,

    /// Show where the key, credentials and data live
    Paths,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    LoggingConfig::new(logging::format_from_env(), "warn".to_string(), cli.verbose).init();

    if let Err(e) = run_command(cli.command).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<ThreadscopeError>()
            .map(ThreadscopeError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run_command(command: Commands) -> Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Keygen { force } => keygen(&config, force),
        Commands::Setup { stdin } => setup(&config, stdin),
        Commands::Verify { offline } => verify(&config, offline).await,
        Commands::List => list(&config),
        Commands::Paths => paths(&config),
    }
}

fn keygen(config: &Config, force: bool) -> Result<()> {
    let key_path = config.storage.key_path();
    let fingerprint = generate_key(&key_path, force)?;

    println!("Generated encryption key at {}", key_path.display());
    println!("Fingerprint: {}", fingerprint);
    println!();
    println!("Back this file up somewhere safe: without it the sealed credentials cannot be read.");
    Ok(())
}

fn setup(config: &Config, use_stdin: bool) -> Result<()> {
    let store = SecretStore::from_config(&config.storage).map_err(|e| match e {
        ThreadscopeError::Credential(_) if e.is_configuration() => {
            anyhow::Error::new(e).context("Run `scope-creds keygen` first")
        }
        other => other.into(),
    })?;

    let credentials = if use_stdin {
        read_credentials_from_stdin()?
    } else {
        prompt_credentials()?
    };

    store.seal_and_store(&credentials)?;

    println!(
        "Stored {} credentials in {}",
        credentials.len(),
        store.blob_path().display()
    );
    Ok(())
}

fn read_credentials_from_stdin() -> Result<Credentials> {
    let mut input = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read credentials from stdin")?;

    let value: Value =
        serde_json::from_str(input.trim()).context("stdin must hold one JSON object")?;
    let credentials = Credentials::from_value(value)?;

    for name in REQUIRED_CREDENTIALS {
        if !credentials.contains(name) {
            anyhow::bail!("Missing '{}' in the JSON read from stdin", name);
        }
    }
    check_shape(&credentials)?;

    Ok(credentials)
}

fn prompt_credentials() -> Result<Credentials> {
    if !atty::is(atty::Stream::Stdin) {
        anyhow::bail!("Not a TTY. Use --stdin to read credentials from stdin for automation.");
    }

    let token = Zeroizing::new(rpassword::prompt_password("Threads access token: ")?);
    let spreadsheet_id = prompt_line("Google spreadsheet id: ")?;
    let service_account_path = prompt_line("Path to the Google service account JSON file: ")?;

    let expanded = libthreadscope::config::expand_path(&service_account_path);
    let service_account = read_service_account(&expanded)?;

    let mut credentials = Credentials::new();
    credentials.insert(THREADS_TOKEN, token.trim().to_string());
    credentials.insert(SPREADSHEET_ID, spreadsheet_id);
    credentials.insert(GOOGLE_CREDENTIALS, service_account);
    check_shape(&credentials)?;

    Ok(credentials)
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn read_service_account(path: &Path) -> Result<Value> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
    );
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    GoogleServiceAccount::from_value(&value)?;
    Ok(value)
}

/// Reject empty strings and malformed service accounts before sealing
fn check_shape(credentials: &Credentials) -> Result<()> {
    for name in [THREADS_TOKEN, SPREADSHEET_ID] {
        match credentials.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => anyhow::bail!("'{}' must be a non-empty string", name),
            None => anyhow::bail!("'{}' is required", name),
        }
    }

    let google = credentials
        .get(GOOGLE_CREDENTIALS)
        .with_context(|| format!("'{}' is required", GOOGLE_CREDENTIALS))?;
    GoogleServiceAccount::from_value(google)?;
    Ok(())
}

async fn verify(config: &Config, offline: bool) -> Result<()> {
    println!("Verifying credentials...");
    println!();

    let mut failures = 0usize;
    let mut report = |label: &str, outcome: std::result::Result<String, String>| match outcome {
        Ok(detail) => println!("  ✓ {:<20} {}", label, detail),
        Err(reason) => {
            failures += 1;
            println!("  ✗ {:<20} {}", label, reason);
        }
    };

    let store = match SecretStore::from_config(&config.storage) {
        Ok(store) => {
            report("encryption key", Ok(format!("fingerprint {}", store.key_fingerprint())));
            store
        }
        Err(e) => {
            report("encryption key", Err(e.to_string()));
            anyhow::bail!("Verification failed: no usable encryption key");
        }
    };

    let credentials = match store.unseal_all() {
        Ok(credentials) => {
            report("credentials file", Ok(format!("{} entries", credentials.len())));
            credentials
        }
        Err(e) => {
            report("credentials file", Err(e.to_string()));
            anyhow::bail!("Verification failed: credentials cannot be read");
        }
    };

    for name in [THREADS_TOKEN, SPREADSHEET_ID] {
        let outcome = match credentials.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok("present".to_string()),
            Some(_) => Err("not a non-empty string".to_string()),
            None => Err("missing".to_string()),
        };
        report(name, outcome);
    }

    let google = match credentials.get(GOOGLE_CREDENTIALS) {
        Some(value) => GoogleServiceAccount::from_value(value)
            .map(|account| format!("{} ({})", account.client_email, account.project_id))
            .map_err(|e| e.to_string()),
        None => Err("missing".to_string()),
    };
    report(GOOGLE_CREDENTIALS, google);
    drop(credentials);

    if offline {
        println!("  - {:<20} skipped (--offline)", "threads api");
    } else {
        let outcome = match ThreadsClient::from_store(&store, &config.api) {
            Ok(client) => client
                .verify_token()
                .await
                .map(|profile| {
                    let who = profile
                        .get("username")
                        .or_else(|| profile.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    format!("token accepted ({})", who)
                })
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        report("threads api", outcome);
    }

    println!();
    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    println!("All credentials verified");
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = SecretStore::from_config(&config.storage)?;
    let names = store.stored_names()?;

    if names.is_empty() {
        println!("No credentials stored");
        return Ok(());
    }

    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn paths(config: &Config) -> Result<()> {
    let key_path = config.storage.key_path();
    let blob_path = config.storage.credentials_path();
    let state = |p: &Path| if p.exists() { "" } else { " (missing)" };

    println!("config:      {}", resolve_config_path()?.display());
    println!("key:         {}{}", key_path.display(), state(&key_path));
    println!("credentials: {}{}", blob_path.display(), state(&blob_path));
    println!("data:        {}", config.output.data_dir().display());
    Ok(())
}

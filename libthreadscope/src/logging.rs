//! Centralized logging configuration for all Threadscope binaries
//!
//! Provides consistent logging setup with support for:
//! - Text, JSON, and pretty-printed output on stderr
//! - Environment variable configuration
//! - An error log file that only appears once something goes wrong
//!
//! # Examples
//!
//! ```no_run
//! use libthreadscope::logging::{LoggingConfig, LogFormat};
//!
//! // JSON output, ERROR events also written under ./logs
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false)
//!     .with_error_log_dir("logs")
//!     .init();
//!
//! // Or use default settings (respects env vars)
//! libthreadscope::logging::init_default();
//! ```

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Environment variable selecting the output format
pub const ENV_LOG_FORMAT: &str = "THREADSCOPE_LOG_FORMAT";

/// Environment variable selecting the minimum level
pub const ENV_LOG_LEVEL: &str = "THREADSCOPE_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
    /// Where `threadscope_YYYYMMDD.log` is created on the first ERROR event
    pub error_log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Create a new logging configuration
    ///
    /// # Arguments
    ///
    /// * `format` - Log output format (text, json, or pretty)
    /// * `level` - Minimum log level (error, warn, info, debug, trace)
    /// * `verbose` - If true, defaults to debug level
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
            error_log_dir: None,
        }
    }

    pub fn with_error_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_log_dir = Some(dir.into());
        self
    }

    /// Initialize logging with the configured settings
    ///
    /// This should be called once at the start of your program.
    ///
    /// # Panics
    ///
    /// Panics if the logging subscriber has already been initialized
    pub fn init(&self) {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = if self.verbose {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
        };

        // The filter only applies to stderr; the error file sees every ERROR event
        let error_file = self.error_log_dir.as_deref().map(ErrorFileLayer::new);
        let registry = tracing_subscriber::registry().with(error_file);

        match self.format {
            LogFormat::Json => {
                registry
                    .with(
                        fmt::layer()
                            .json()
                            .with_writer(std::io::stderr)
                            .with_current_span(true)
                            .with_span_list(true)
                            .flatten_event(true)
                            .with_target(true)
                            .with_line_number(true)
                            .with_file(true)
                            .with_filter(filter),
                    )
                    .init();
            }
            LogFormat::Pretty => {
                registry
                    .with(
                        fmt::layer()
                            .pretty()
                            .with_writer(std::io::stderr)
                            .with_target(true)
                            .with_line_number(true)
                            .with_file(true)
                            .with_filter(filter),
                    )
                    .init();
            }
            LogFormat::Text => {
                registry
                    .with(
                        fmt::layer()
                            .with_writer(std::io::stderr)
                            .with_target(false)
                            .with_level(true)
                            .with_filter(filter),
                    )
                    .init();
            }
        }
    }
}

/// Initialize logging with default settings
///
/// Respects `THREADSCOPE_LOG_FORMAT` and `THREADSCOPE_LOG_LEVEL` environment variables.
/// Falls back to text format with info level if not set. No error log file is written.
pub fn init_default() {
    LoggingConfig::new(format_from_env(), level_from_env(), false).init();
}

/// Format named by `THREADSCOPE_LOG_FORMAT`, text if unset or invalid
pub fn format_from_env() -> LogFormat {
    std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text)
}

/// Level named by `THREADSCOPE_LOG_LEVEL`, info if unset
pub fn level_from_env() -> String {
    std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string())
}

/// Layer appending ERROR events to a dated file
///
/// The file is opened on the first ERROR event, so runs without errors leave
/// nothing behind.
pub struct ErrorFileLayer {
    dir: PathBuf,
    file: Mutex<Option<File>>,
    write_failed: AtomicBool,
}

impl ErrorFileLayer {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            file: Mutex::new(None),
            write_failed: AtomicBool::new(false),
        }
    }

    /// Path of today's error log
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!(
            "threadscope_{}.log",
            chrono::Local::now().format("%Y%m%d")
        ))
    }

    fn open(&self) -> std::io::Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
    }
}

impl<S: Subscriber> Layer<S> for ErrorFileLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{} - ERROR - {}: {}{}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().target(),
            visitor.message,
            visitor.fields
        );

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            match self.open() {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    eprintln!("Failed to create error log in {}: {}", self.dir.display(), e);
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            // Only the first failed write is reported
            if let Err(e) = file.write_all(line.as_bytes()) {
                if !self.write_failed.swap(true, Ordering::Relaxed) {
                    eprintln!(
                        "Failed to write error log {}: {}",
                        self.current_path().display(),
                        e
                    );
                }
            }
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

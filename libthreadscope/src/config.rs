//! Configuration management for Threadscope

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Overrides the key file location from `[storage]`.
pub const ENV_KEY_PATH: &str = "CRYPTO_KEY_PATH";
/// Overrides the sealed credentials location from `[storage]`.
pub const ENV_CREDENTIALS_PATH: &str = "CREDENTIALS_PATH";
/// Overrides `[output].data_dir`.
pub const ENV_DATA_DIR: &str = "THREADSCOPE_DATA_DIR";
/// Points at an alternative config file.
pub const ENV_CONFIG: &str = "THREADSCOPE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub key_path: String,
    pub credentials_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_path: "~/.config/threadscope/keys/crypto.key".to_string(),
            credentials_path: "~/.config/threadscope/credentials.enc".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn key_path(&self) -> PathBuf {
        expand_path(&self.key_path)
    }

    pub fn credentials_path(&self) -> PathBuf {
        expand_path(&self.credentials_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Page size for the post listing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of insights requests in flight per sub-batch
    #[serde(default = "default_insights_batch_size")]
    pub insights_batch_size: usize,

    /// Fixed pause after every request
    #[serde(default = "default_request_delay", with = "duration_str")]
    pub request_delay: Duration,

    /// How long fetched insights stay valid in memory
    #[serde(default = "default_cache_ttl", with = "duration_str")]
    pub cache_ttl: Duration,

    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,
}

fn default_base_url() -> String {
    "https://graph.threads.net/v1.0".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_insights_batch_size() -> usize {
    10
}

fn default_request_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            insights_batch_size: default_insights_batch_size(),
            request_delay: default_request_delay(),
            cache_ttl: default_cache_ttl(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// IANA timezone that post dates are converted to
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Post limit used by test mode when no explicit limit is given
    #[serde(default = "default_test_limit")]
    pub test_limit: usize,
}

fn default_data_dir() -> String {
    "~/.local/share/threadscope".to_string()
}

fn default_timezone() -> String {
    "Asia/Taipei".to_string()
}

fn default_test_limit() -> usize {
    50
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            timezone: default_timezone(),
            test_limit: default_test_limit(),
        }
    }
}

impl OutputConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            ConfigError::InvalidValue {
                field: "output.timezone".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing config file is not an error: defaults are used, then
    /// environment overrides are applied.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Apply `CRYPTO_KEY_PATH`, `CREDENTIALS_PATH` and `THREADSCOPE_DATA_DIR`
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = non_empty_env(ENV_KEY_PATH) {
            self.storage.key_path = path;
        }
        if let Some(path) = non_empty_env(ENV_CREDENTIALS_PATH) {
            self.storage.credentials_path = path;
        }
        if let Some(path) = non_empty_env(ENV_DATA_DIR) {
            self.output.data_dir = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.key_path.is_empty() {
            return Err(ConfigError::MissingField("storage.key_path".to_string()).into());
        }
        if self.storage.credentials_path.is_empty() {
            return Err(ConfigError::MissingField("storage.credentials_path".to_string()).into());
        }
        if self.api.batch_size == 0 {
            return Err(invalid("api.batch_size", "must be greater than zero"));
        }
        if self.api.insights_batch_size == 0 {
            return Err(invalid("api.insights_batch_size", "must be greater than zero"));
        }
        if self.output.test_limit == 0 {
            return Err(invalid("output.test_limit", "must be greater than zero"));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(invalid("api.base_url", "must be an http(s) URL"));
        }
        self.output.timezone()?;
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::ThreadscopeError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Some(path) = non_empty_env(ENV_CONFIG) {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("threadscope").join("config.toml"))
}

/// Durations written the way people type them: "500ms", "1h", "30s"
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

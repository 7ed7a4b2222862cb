//! Error types for Threadscope

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThreadscopeError>;

#[derive(Error, Debug)]
pub enum ThreadscopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ThreadscopeError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ThreadscopeError::InvalidInput(_) => 3,
            ThreadscopeError::Api(ApiError::Authentication(_)) => 2,
            ThreadscopeError::Credential(CredentialError::Decryption(_)) => 2,
            ThreadscopeError::Credential(CredentialError::NotFound(_)) => 2,
            ThreadscopeError::Credential(_) => 1,
            ThreadscopeError::Api(_) => 1,
            ThreadscopeError::Config(_) => 1,
            ThreadscopeError::Io(_) => 1,
        }
    }

    /// True for failures that mean the local setup is wrong (missing key, blob, setting).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ThreadscopeError::Config(_)
                | ThreadscopeError::Credential(CredentialError::KeyNotFound(_))
                | ThreadscopeError::Credential(CredentialError::BlobNotFound(_))
                | ThreadscopeError::Credential(CredentialError::InvalidKey(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Encryption key file not found: {0}")]
    KeyNotFound(String),

    #[error("Credentials file not found: {0}")]
    BlobNotFound(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption key already exists at {0} (use --force to replace it; existing credentials become unreadable)")]
    KeyExists(String),

    #[error("Invalid encryption key or corrupted data: {0}")]
    Decryption(String),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Invalid value for credential '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential file IO failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

//! Threadscope - collect Threads posts and their engagement metrics
//!
//! This library holds the sealed credential store, the Threads API client with
//! its batched insights engine, and the sinks that persist collected posts.
//! The `scope-*` binaries are thin shells over it.

pub mod api;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod secrets;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use api::{ThreadsClient, Transport};
pub use collector::{CollectMode, Collector};
pub use config::Config;
pub use error::{Result, ThreadscopeError};
pub use secrets::{Credentials, SecretStore};
pub use types::{Post, PostMetrics, PostRecord};

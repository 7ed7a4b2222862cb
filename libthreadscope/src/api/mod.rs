//! Threads Graph API client
//!
//! The client talks to the API through the [`Transport`] trait so the
//! pagination and insights logic can run against [`mock::MockTransport`] in
//! tests and [`http::HttpTransport`] in production.
//!
//! # Examples
//!
//! ```no_run
//! use libthreadscope::api::ThreadsClient;
//! use libthreadscope::config::Config;
//! use libthreadscope::secrets::SecretStore;
//!
//! # async fn example() -> libthreadscope::error::Result<()> {
//! let config = Config::load()?;
//! let store = SecretStore::from_config(&config.storage)?;
//! let mut client = ThreadsClient::from_store(&store, &config.api)?;
//!
//! let posts = client.list_posts(10, true, None).await;
//! let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
//! let metrics = client.fetch_insights(&ids).await;
//! println!("{} posts, {} with metrics", posts.len(), metrics.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{Clock, InsightsCache};
use crate::config::ApiConfig;
use crate::error::{ApiError, CredentialError, Result, ThreadscopeError};
use crate::secrets::{SecretStore, THREADS_TOKEN};
use crate::types::{Post, POST_FIELDS};

pub mod http;
pub mod insights;

// Available outside tests so integration tests and downstream tools can script responses
pub mod mock;

pub use insights::InsightOutcome;

/// Query parameters as sent on the wire
pub type Params = Vec<(String, String)>;

/// Listing endpoint for the authorized user's posts
pub const POSTS_ENDPOINT: &str = "me/threads";

/// Profile endpoint, used to check that a token is accepted
pub const PROFILE_ENDPOINT: &str = "me";

/// Minimal HTTP GET seam under the client
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` with `params` and decode the body as JSON
    ///
    /// # Errors
    ///
    /// - `ApiError::Status` for non-2xx responses, carrying the body text
    /// - `ApiError::Network` when the request could not be completed
    /// - `ApiError::Decode` when the body is not JSON
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<Value>;
}

/// Client for the authorized user's posts and their insights
pub struct ThreadsClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    batch_size: usize,
    insights_batch_size: usize,
    request_delay: Duration,
    cache: InsightsCache,
}

impl std::fmt::Debug for ThreadsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadsClient")
            .field("base_url", &self.base_url)
            .field("batch_size", &self.batch_size)
            .field("insights_batch_size", &self.insights_batch_size)
            .field("request_delay", &self.request_delay)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ThreadsClient {
    /// Create a client that authenticates with `token` over HTTP
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Authentication` if the token is empty.
    pub fn new(token: SecretString, config: &ApiConfig) -> Result<Self> {
        if token.expose_secret().trim().is_empty() {
            return Err(ApiError::Authentication("access token is empty".to_string()).into());
        }

        let transport = http::HttpTransport::new(token, config.timeout)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Create a client whose token comes from the sealed credential store
    ///
    /// A missing `threads_token` is reported as an authentication failure;
    /// key and blob problems propagate unchanged.
    pub fn from_store(store: &SecretStore, config: &ApiConfig) -> Result<Self> {
        let token = match store.credential(THREADS_TOKEN) {
            Ok(token) => token,
            Err(ThreadscopeError::Credential(CredentialError::NotFound(_))) => {
                return Err(ApiError::Authentication(format!(
                    "'{}' is not stored; run `scope-creds setup`",
                    THREADS_TOKEN
                ))
                .into());
            }
            Err(e) => return Err(e),
        };

        Self::new(token, config)
    }

    /// Create a client over an arbitrary transport
    pub fn with_transport(transport: Arc<dyn Transport>, config: &ApiConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            insights_batch_size: config.insights_batch_size.max(1),
            request_delay: config.request_delay,
            cache: InsightsCache::new(config.cache_ttl),
        }
    }

    /// Replace the insights cache clock
    ///
    /// Drops anything already cached.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = InsightsCache::with_clock(self.cache.ttl(), clock);
        self
    }

    pub fn cache(&self) -> &InsightsCache {
        &self.cache
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET an endpoint relative to the base URL, then wait the request delay
    ///
    /// The delay is applied whether or not the request succeeded.
    pub async fn request(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        tracing::debug!("GET {}", url);

        let result = self.transport.get(&url, params).await;
        if let Err(e) = &result {
            tracing::debug!("Request to {} failed: {}", url, e);
        }

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        result
    }

    /// Fetch the authorized user's posts, following pagination
    ///
    /// In test mode at most `limit` posts are returned and page sizes shrink to
    /// what is still needed. Otherwise every page is followed and `limit` is
    /// ignored. `since` is passed to the API verbatim.
    ///
    /// A failing page ends the walk: the error is logged and the posts gathered
    /// so far are returned.
    pub async fn list_posts(&self, limit: usize, test_mode: bool, since: Option<&str>) -> Vec<Post> {
        let mut posts: Vec<Post> = Vec::new();
        let mut next_page = Some(POSTS_ENDPOINT.to_string());

        tracing::info!(
            "Fetching posts (limit: {}, test mode: {}, since: {})",
            limit,
            test_mode,
            since.unwrap_or("-")
        );

        while let Some(endpoint) = next_page.take() {
            if test_mode && posts.len() >= limit {
                break;
            }

            let page_size = if test_mode {
                (limit - posts.len()).min(self.batch_size)
            } else {
                self.batch_size
            };

            let mut params: Params = vec![
                ("fields".to_string(), POST_FIELDS.join(",")),
                ("limit".to_string(), page_size.to_string()),
            ];
            if let Some(since) = since {
                params.push(("since".to_string(), since.to_string()));
            }

            let body = match self.request(&endpoint, &params).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("Error occurred while fetching posts: {}", e);
                    break;
                }
            };

            match parse_page(&body) {
                Ok(page) => {
                    tracing::info!("Retrieved {} posts in this page", page.len());
                    posts.extend(page);
                }
                Err(e) => {
                    tracing::error!("Error occurred while fetching posts: {}", e);
                    break;
                }
            }

            next_page = body
                .get("paging")
                .and_then(|paging| paging.get("next"))
                .and_then(Value::as_str)
                .map(|next| self.strip_base(next));

            if let Some(next) = &next_page {
                tracing::debug!("Next page: {}", next);
            }
        }

        if test_mode {
            posts.truncate(limit);
        }

        tracing::info!("Total posts retrieved: {}", posts.len());
        posts
    }

    /// Check that the token is accepted by fetching the user profile
    pub async fn verify_token(&self) -> Result<Value> {
        self.request(PROFILE_ENDPOINT, &[]).await
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    fn strip_base(&self, next: &str) -> String {
        let prefix = format!("{}/", self.base_url);
        next.strip_prefix(&prefix).unwrap_or(next).to_string()
    }
}

/// Decode one listing page; an entry that is not a post is skipped with a warning
fn parse_page(body: &Value) -> Result<Vec<Post>> {
    let entries = match body.get("data") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(ApiError::Decode(format!(
                "unexpected post listing: expected an array, got {}",
                other
            ))
            .into())
        }
    };

    let mut posts = Vec::with_capacity(entries.len());
    for entry in entries {
        match Post::deserialize(entry) {
            Ok(post) => posts.push(post),
            Err(e) => tracing::warn!("Skipping malformed post {}: {}", entry, e),
        }
    }
    Ok(posts)
}

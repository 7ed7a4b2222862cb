//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::api::Transport;
use crate::error::{ApiError, Result};

/// HTTP transport sending the access token as a bearer header
pub struct HttpTransport {
    client: Client,
    token: SecretString,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport whose requests give up after `timeout`
    pub fn new(token: SecretString, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("threadscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, token })
    }

    async fn handle_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("API response status {}: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()).into())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.without_url().to_string()))?;

        Self::handle_response(response).await
    }
}

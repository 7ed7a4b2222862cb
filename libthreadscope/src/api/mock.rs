//! Scripted transport for testing
//!
//! Routes are endpoint paths relative to the API base (for example
//! `me/threads` or `123/insights`). A request matches a route when its URL ends
//! with `/<route>`; unmatched requests fail with a 404 status error. Every
//! request is recorded so tests can assert on call counts and parameters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use crate::api::Transport;
use crate::error::{ApiError, Result};

/// A request seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum MockResponse {
    Json(Value),
    Fail(ApiError),
}

/// Transport returning canned responses
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: HashMap<String, MockResponse>,
    delay: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `route` with `body`
    pub fn respond(mut self, route: &str, body: Value) -> Self {
        self.routes
            .insert(route.to_string(), MockResponse::Json(body));
        self
    }

    /// Fail every request to `route` with `error`
    pub fn fail(mut self, route: &str, error: ApiError) -> Self {
        self.routes
            .insert(route.to_string(), MockResponse::Fail(error));
        self
    }

    /// Hold every request for `delay` before answering (simulates latency)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// All requests in the order they were made
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of requests that hit `route`
    pub fn count_for(&self, route: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| route_matches(&r.url, route))
            .count()
    }

    /// Highest number of requests that were in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> Option<&MockResponse> {
        self.routes
            .iter()
            .filter(|(route, _)| route_matches(url, route))
            .max_by_key(|(route, _)| route.len())
            .map(|(_, response)| response)
    }
}

fn route_matches(url: &str, route: &str) -> bool {
    url.ends_with(&format!("/{}", route.trim_start_matches('/')))
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                url: url.to_string(),
                params: params.to_vec(),
            });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.lookup(url) {
            Some(MockResponse::Json(body)) => Ok(body.clone()),
            Some(MockResponse::Fail(error)) => Err(error.clone().into()),
            None => Err(ApiError::Status {
                status: 404,
                body: format!("no mock route for {}", url),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThreadscopeError;
    use serde_json::json;

    #[tokio::test]
    async fn test_routes_match_on_path_suffix() {
        let mock = MockTransport::new()
            .respond("me", json!({"id": "1"}))
            .respond("me/threads", json!({"data": []}));

        let profile = mock.get("https://api.test/v1/me", &[]).await.unwrap();
        assert_eq!(profile["id"], "1");

        let listing = mock.get("https://api.test/v1/me/threads", &[]).await.unwrap();
        assert_eq!(listing["data"], json!([]));

        assert_eq!(mock.count_for("me"), 1);
        assert_eq!(mock.count_for("me/threads"), 1);
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_collide() {
        let mock = MockTransport::new()
            .respond("a/insights", json!({"data": []}))
            .fail("ba/insights", ApiError::Network("reset".to_string()));

        assert!(mock.get("https://api.test/a/insights", &[]).await.is_ok());
        assert!(mock.get("https://api.test/ba/insights", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let mock = MockTransport::new();
        let err = mock.get("https://api.test/nowhere", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ThreadscopeError::Api(ApiError::Status { status: 404, .. })
        ));
        assert_eq!(mock.request_count(), 1);
    }
}

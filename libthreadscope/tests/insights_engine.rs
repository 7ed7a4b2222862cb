//! Insights batch engine tests
//!
//! These run the client against a scripted transport, so they check request
//! counts, caching and failure handling without network access.

use std::sync::Arc;
use std::time::Duration;

use libthreadscope::api::mock::MockTransport;
use libthreadscope::api::ThreadsClient;
use libthreadscope::cache::ManualClock;
use libthreadscope::config::ApiConfig;
use libthreadscope::error::ApiError;
use libthreadscope::types::PostMetrics;
use serde_json::{json, Value};

const BASE: &str = "https://graph.example.test/v1.0";

fn config(insights_batch_size: usize) -> ApiConfig {
    ApiConfig {
        base_url: BASE.to_string(),
        insights_batch_size,
        request_delay: Duration::ZERO,
        cache_ttl: Duration::from_secs(3600),
        ..ApiConfig::default()
    }
}

fn insights(views: u64, likes: u64) -> Value {
    json!({
        "data": [
            {"name": "views", "values": [{"value": views}]},
            {"name": "likes", "total_value": {"value": likes}}
        ]
    })
}

fn metrics(views: u64, likes: u64) -> PostMetrics {
    PostMetrics {
        views,
        likes,
        ..PostMetrics::default()
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn mock_for(post_ids: &[&str]) -> MockTransport {
    post_ids
        .iter()
        .enumerate()
        .fold(MockTransport::new(), |mock, (i, id)| {
            mock.respond(&format!("{}/insights", id), insights((i as u64 + 1) * 10, 1))
        })
}

#[tokio::test]
async fn test_end_to_end_with_one_failing_post() {
    let mock = Arc::new(
        MockTransport::new()
            .respond("a/insights", insights(100, 10))
            .fail(
                "b/insights",
                ApiError::Status {
                    status: 500,
                    body: "internal".to_string(),
                },
            )
            .respond("c/insights", insights(50, 5)),
    );
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    let result = client.fetch_insights(&ids(&["a", "b", "c"])).await;

    assert_eq!(result.len(), 3);
    assert_eq!(result["a"], metrics(100, 10));
    assert_eq!(result["b"], PostMetrics::zeroed());
    assert_eq!(result["c"], metrics(50, 5));
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test]
async fn test_insights_request_names_every_metric() {
    let mock = Arc::new(mock_for(&["a"]));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    client.fetch_insights(&ids(&["a"])).await;

    let request = &mock.requests()[0];
    assert_eq!(request.url, format!("{}/a/insights", BASE));
    assert_eq!(
        request.params,
        vec![(
            "metric".to_string(),
            "views,likes,replies,reposts,quotes,shares".to_string()
        )]
    );
}

#[tokio::test]
async fn test_only_cache_misses_are_fetched() {
    let all = ["p1", "p2", "p3", "p4", "p5"];
    let mock = Arc::new(mock_for(&all));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(2));

    client.fetch_insights(&ids(&["p2", "p4"])).await;
    assert_eq!(mock.request_count(), 2);

    let result = client.fetch_insights(&ids(&all)).await;

    assert_eq!(result.len(), 5);
    assert_eq!(mock.request_count(), 5, "Only the 3 misses are requested");
    assert_eq!(mock.count_for("p2/insights"), 1);
    assert_eq!(mock.count_for("p4/insights"), 1);
}

#[tokio::test]
async fn test_cache_expiry_with_manual_clock() {
    let clock = ManualClock::new();
    let mock = Arc::new(mock_for(&["a"]));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10))
        .with_clock(Arc::new(clock.clone()));

    client.fetch_insights(&ids(&["a"])).await;
    clock.advance(Duration::from_secs(3599));
    client.fetch_insights(&ids(&["a"])).await;
    assert_eq!(mock.request_count(), 1, "Served from cache within the TTL");

    clock.advance(Duration::from_secs(2));
    let result = client.fetch_insights(&ids(&["a"])).await;
    assert_eq!(mock.request_count(), 2, "Expired entry is fetched once more");
    assert_eq!(result["a"], metrics(10, 1));
}

#[tokio::test]
async fn test_duplicate_ids_are_fetched_once() {
    let mock = Arc::new(mock_for(&["a", "b"]));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    let result = client.fetch_insights(&ids(&["a", "a", "b", "a"])).await;

    assert_eq!(result.len(), 2);
    assert_eq!(mock.count_for("a/insights"), 1);
    assert_eq!(mock.count_for("b/insights"), 1);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let mock = Arc::new(
        MockTransport::new()
            .respond("a/insights", insights(100, 10))
            .fail("b/insights", ApiError::Network("connection reset".to_string())),
    );
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    client.fetch_insights(&ids(&["a", "b"])).await;
    client.fetch_insights(&ids(&["a", "b"])).await;

    assert_eq!(mock.count_for("a/insights"), 1);
    assert_eq!(mock.count_for("b/insights"), 2, "Zero-filled result is retried");
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn test_refresh_bypasses_cache_but_updates_it() {
    let mock = Arc::new(mock_for(&["a"]));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    client.fetch_insights(&ids(&["a"])).await;
    client.refresh_insights(&ids(&["a"])).await;
    assert_eq!(mock.request_count(), 2);

    client.fetch_insights(&ids(&["a"])).await;
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_sub_batch_size() {
    let all = ["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
    let mock = Arc::new(mock_for(&all).with_delay(Duration::from_millis(20)));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(3));

    let result = client.fetch_insights(&ids(&all)).await;

    assert_eq!(result.len(), 7);
    assert_eq!(mock.peak_in_flight(), 3);
}

#[tokio::test]
async fn test_sub_batches_run_in_input_order() {
    let all = ["p1", "p2", "p3", "p4", "p5"];
    let mock = Arc::new(mock_for(&all));
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(2));

    client.fetch_insights(&ids(&all)).await;

    let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
    let position = |id: &str| {
        urls.iter()
            .position(|u| u.ends_with(&format!("/{}/insights", id)))
            .unwrap()
    };
    // Each sub-batch finishes before the next one starts
    assert!(position("p1") < position("p3"));
    assert!(position("p2") < position("p3"));
    assert!(position("p4") < position("p5"));
}

#[tokio::test]
async fn test_empty_input() {
    let mock = Arc::new(MockTransport::new());
    let mut client = ThreadsClient::with_transport(mock.clone(), &config(10));

    assert!(client.fetch_insights(&[]).await.is_empty());
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn test_broken_second_page_returns_first_page_only() {
    let mock = Arc::new(
        MockTransport::new()
            .respond(
                "me/threads",
                json!({
                    "data": [{"id": "1"}, {"id": "2"}],
                    "paging": {"next": format!("{}/me/threads?after=page2", BASE)}
                }),
            )
            .fail(
                "me/threads?after=page2",
                ApiError::Status {
                    status: 400,
                    body: "invalid cursor".to_string(),
                },
            )
            .respond(
                "me/threads?after=page3",
                json!({"data": [{"id": "5"}]}),
            ),
    );
    let client = ThreadsClient::with_transport(mock.clone(), &config(10));

    let posts = client.list_posts(100, false, None).await;

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(mock.count_for("me/threads?after=page3"), 0);
}

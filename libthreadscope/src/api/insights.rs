//! Batched insights retrieval
//!
//! Requested ids are deduplicated, cached entries are served from memory and
//! the misses are fetched in fixed-size sub-batches. Sub-batches run one after
//! another; the requests inside a sub-batch run concurrently. A failed fetch
//! never fails the call: the post gets an all-zero bundle and the failure is
//! logged.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;

use crate::api::ThreadsClient;
use crate::types::{PostMetrics, METRIC_NAMES};

/// Result of fetching one post's insights
#[derive(Debug, Clone, PartialEq)]
pub enum InsightOutcome {
    Fetched(PostMetrics),
    Failed(String),
}

impl ThreadsClient {
    /// Metrics for every distinct id in `post_ids`, served from cache when fresh
    pub async fn fetch_insights(&mut self, post_ids: &[String]) -> HashMap<String, PostMetrics> {
        self.collect_insights(post_ids, true).await
    }

    /// Metrics for every distinct id, ignoring cached values
    ///
    /// Fresh results still replace the cached ones.
    pub async fn refresh_insights(&mut self, post_ids: &[String]) -> HashMap<String, PostMetrics> {
        self.collect_insights(post_ids, false).await
    }

    /// Fetch one post's insights
    pub async fn post_insights(&self, post_id: &str) -> InsightOutcome {
        let endpoint = format!("{}/insights", post_id);
        let params = vec![("metric".to_string(), METRIC_NAMES.join(","))];

        match self.request(&endpoint, &params).await {
            Ok(body) => InsightOutcome::Fetched(PostMetrics::from_insights(&body)),
            Err(e) => InsightOutcome::Failed(e.to_string()),
        }
    }

    async fn collect_insights(
        &mut self,
        post_ids: &[String],
        use_cache: bool,
    ) -> HashMap<String, PostMetrics> {
        let distinct = dedupe(post_ids);
        if distinct.len() != post_ids.len() {
            tracing::debug!(
                "Ignoring {} duplicate post id(s)",
                post_ids.len() - distinct.len()
            );
        }

        let mut results = HashMap::with_capacity(distinct.len());
        let mut misses = Vec::new();

        for id in distinct {
            let cached = if use_cache { self.cache.get(&id) } else { None };
            match cached {
                Some(metrics) => {
                    results.insert(id, metrics);
                }
                None => misses.push(id),
            }
        }

        tracing::info!(
            "Insights: {} from cache, {} to fetch",
            results.len(),
            misses.len()
        );

        let total_batches = misses.len().div_ceil(self.insights_batch_size);
        for (index, batch) in misses.chunks(self.insights_batch_size).enumerate() {
            tracing::info!(
                "Fetching insights batch {}/{} ({} posts)",
                index + 1,
                total_batches,
                batch.len()
            );

            let outcomes = {
                let client = &*self;
                join_all(batch.iter().map(|id| client.post_insights(id))).await
            };

            for (id, outcome) in batch.iter().zip(outcomes) {
                let metrics = match outcome {
                    InsightOutcome::Fetched(metrics) => {
                        self.cache.insert(id.clone(), metrics.clone());
                        metrics
                    }
                    InsightOutcome::Failed(reason) => {
                        tracing::error!("Error fetching insights for post {}: {}", id, reason);
                        PostMetrics::zeroed()
                    }
                };
                results.insert(id.clone(), metrics);
            }
        }

        results
    }
}

fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

//! Core types for Threadscope

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Fields requested for every post in the listing call
pub const POST_FIELDS: [&str; 7] = [
    "id",
    "shortcode",
    "timestamp",
    "text",
    "is_quote_post",
    "media_type",
    "permalink",
];

/// Metrics requested from the insights endpoint
pub const METRIC_NAMES: [&str; 6] = ["views", "likes", "replies", "reposts", "quotes", "shares"];

/// A post as returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shortcode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_quote_post: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub permalink: String,
}

/// Explicit `null` reads the same as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Engagement counters for one post
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub quotes: u64,
    #[serde(default)]
    pub shares: u64,
}

impl PostMetrics {
    /// All-zero bundle substituted for a failed fetch
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Set a counter by its API name; unknown names are ignored
    pub fn set(&mut self, name: &str, value: u64) {
        match name {
            "views" => self.views = value,
            "likes" => self.likes = value,
            "replies" => self.replies = value,
            "reposts" => self.reposts = value,
            "quotes" => self.quotes = value,
            "shares" => self.shares = value,
            other => tracing::debug!("Ignoring unknown metric '{}'", other),
        }
    }

    /// Parse an insights response body
    ///
    /// Each entry contributes `values[0].value` when `values` is non-empty,
    /// otherwise `total_value.value`. A body without `data` yields zeros.
    pub fn from_insights(body: &Value) -> Self {
        let mut metrics = Self::zeroed();

        let Some(data) = body.get("data").and_then(Value::as_array) else {
            return metrics;
        };

        for entry in data {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };

            let value = match entry.get("values").and_then(Value::as_array) {
                Some(values) if !values.is_empty() => counter(values[0].get("value")),
                _ => entry
                    .get("total_value")
                    .map(|total| counter(total.get("value")))
                    .unwrap_or(0),
            };

            metrics.set(name, value);
        }

        metrics
    }

    /// likes + replies + reposts + quotes + shares
    pub fn engagement(&self) -> u64 {
        [self.replies, self.reposts, self.quotes, self.shares]
            .into_iter()
            .fold(self.likes, u64::saturating_add)
    }

    /// Engagement per view rounded to two decimals, 0 without views
    pub fn engagement_rate(&self) -> f64 {
        if self.views == 0 {
            return 0.0;
        }
        let rate = self.engagement() as f64 / self.views as f64;
        (rate * 100.0).round() / 100.0
    }
}

fn counter(value: Option<&Value>) -> u64 {
    match value {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}

/// A collected post with its metrics, as written to the sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post_id: String,
    #[serde(default)]
    pub shortcode: String,
    /// Post time in the configured timezone, `%Y-%m-%dT%H:%M:%S%z`
    pub post_date: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_quote: bool,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(flatten)]
    pub metrics: PostMetrics,
}

impl PostRecord {
    /// Column order of the spreadsheet / CSV backup
    pub const SHEET_HEADERS: [&'static str; 15] = [
        "post_id",
        "shortcode",
        "post_date",
        "content",
        "is_quote",
        "media_type",
        "permalink",
        "views",
        "likes",
        "replies",
        "reposts",
        "quotes",
        "shares",
        "engagement",
        "engagement_rate",
    ];

    /// Spreadsheet row in `SHEET_HEADERS` order
    pub fn to_sheet_row(&self) -> Vec<String> {
        let m = &self.metrics;
        vec![
            self.post_id.clone(),
            self.shortcode.clone(),
            self.post_date.clone(),
            self.content.clone(),
            self.is_quote.to_string(),
            self.media_type.clone(),
            self.permalink.clone(),
            m.views.to_string(),
            m.likes.to_string(),
            m.replies.to_string(),
            m.reposts.to_string(),
            m.quotes.to_string(),
            m.shares.to_string(),
            m.engagement().to_string(),
            m.engagement_rate().to_string(),
        ]
    }
}

//! Post collection
//!
//! Combines the post listing with insights into [`PostRecord`]s, converting
//! post times to the configured timezone.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use chrono_tz::Tz;

use crate::api::ThreadsClient;
use crate::config::OutputConfig;
use crate::error::Result;
use crate::sink::{read_backup, BACKUP_FILE};
use crate::types::{Post, PostMetrics, PostRecord};

/// Timestamp layout used by the API and by `post_date`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Which posts a run collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    /// At most `limit` posts
    Test { limit: usize },
    /// Every post
    Force,
    /// Only posts since the newest one in the CSV backup
    Normal,
}

impl CollectMode {
    pub fn name(&self) -> &'static str {
        match self {
            CollectMode::Test { .. } => "test",
            CollectMode::Force => "force",
            CollectMode::Normal => "normal",
        }
    }
}

pub struct Collector {
    client: ThreadsClient,
    timezone: Tz,
    data_dir: PathBuf,
}

impl Collector {
    pub fn new(client: ThreadsClient, output: &OutputConfig) -> Result<Self> {
        Ok(Self::with_timezone(client, output.timezone()?, output.data_dir()))
    }

    pub fn with_timezone(client: ThreadsClient, timezone: Tz, data_dir: PathBuf) -> Self {
        Self {
            client,
            timezone,
            data_dir,
        }
    }

    pub fn client(&self) -> &ThreadsClient {
        &self.client
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(BACKUP_FILE)
    }

    /// Collect posts for `mode` and attach their metrics
    ///
    /// Listing failures shorten the result rather than failing the run, and
    /// posts whose metrics could not be fetched carry zeros. In normal mode an
    /// unreadable backup is an error.
    pub async fn collect(&mut self, mode: CollectMode) -> Result<Vec<PostRecord>> {
        tracing::info!("Collecting posts in {} mode", mode.name());

        let posts = match mode {
            CollectMode::Test { limit } => self.client.list_posts(limit, true, None).await,
            CollectMode::Force => self.client.list_posts(0, false, None).await,
            CollectMode::Normal => {
                let since = latest_backup_date(&self.backup_path())?;
                match &since {
                    Some(date) => tracing::info!("Latest backed up post is from {}", date),
                    None => tracing::info!("No backup found, collecting every post"),
                }
                self.client.list_posts(0, false, since.as_deref()).await
            }
        };

        if posts.is_empty() {
            tracing::info!("No posts to process");
            return Ok(Vec::new());
        }

        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let insights = self.client.fetch_insights(&ids).await;

        let records = posts
            .iter()
            .map(|post| {
                let metrics = insights.get(&post.id).cloned().unwrap_or_default();
                to_record(post, metrics, self.timezone)
            })
            .collect::<Vec<_>>();

        tracing::info!("Collected {} posts", records.len());
        Ok(records)
    }
}

/// Build a record from a listed post and its metrics
///
/// A timestamp that does not parse is kept as-is.
pub fn to_record(post: &Post, metrics: PostMetrics, timezone: Tz) -> PostRecord {
    let post_date = convert_timestamp(&post.timestamp, timezone).unwrap_or_else(|| {
        tracing::warn!(
            "Post {} has an unparseable timestamp '{}'",
            post.id,
            post.timestamp
        );
        post.timestamp.clone()
    });

    PostRecord {
        post_id: post.id.clone(),
        shortcode: post.shortcode.clone(),
        post_date,
        content: post.text.clone().unwrap_or_default(),
        is_quote: post.is_quote_post,
        media_type: post.media_type.clone(),
        permalink: post.permalink.clone(),
        metrics,
    }
}

/// Re-express an API timestamp in `timezone`
pub fn convert_timestamp(timestamp: &str, timezone: Tz) -> Option<String> {
    let parsed = DateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some(parsed.with_timezone(&timezone).format(TIMESTAMP_FORMAT).to_string())
}

/// Date (`YYYY-MM-DD`) of the newest post in the backup at `path`
///
/// `None` when there is no backup, it holds no rows, or no row has a
/// parseable date.
pub fn latest_backup_date(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let latest = read_backup(path)?
        .iter()
        .filter_map(|record| DateTime::parse_from_str(&record.post_date, TIMESTAMP_FORMAT).ok())
        .max();

    Ok(latest.map(|date| date.format("%Y-%m-%d").to_string()))
}

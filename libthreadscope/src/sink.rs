//! Destinations for collected post records
//!
//! - [`JsonSnapshotSink`] overwrites `posts.json` with the latest run
//! - [`CsvBackupSink`] merges the run into `threads_data.csv`, the long-lived
//!   backup that normal mode reads to find where to resume

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;

use crate::collector::TIMESTAMP_FORMAT;
use crate::error::{Result, ThreadscopeError};
use crate::types::{PostMetrics, PostRecord};

/// File name of the JSON snapshot inside the data directory
pub const SNAPSHOT_FILE: &str = "posts.json";

/// File name of the CSV backup inside the data directory
pub const BACKUP_FILE: &str = "threads_data.csv";

#[async_trait]
pub trait Sink: Send {
    /// Deliver one run's records
    async fn publish(&mut self, records: &[PostRecord]) -> Result<()>;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}

/// Pretty-printed JSON array of the latest run, replaced on every publish
#[derive(Debug, Clone)]
pub struct JsonSnapshotSink {
    path: PathBuf,
}

impl JsonSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonSnapshotSink {
    async fn publish(&mut self, records: &[PostRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records).map_err(|e| {
            ThreadscopeError::InvalidInput(format!("Failed to serialize records: {}", e))
        })?;
        write_atomic(&self.path, &json)?;

        tracing::info!("Saved {} posts to {:?}", records.len(), self.path);
        Ok(())
    }

    fn name(&self) -> &str {
        "json-snapshot"
    }
}

/// Read records back from a JSON snapshot
pub fn read_snapshot(path: &Path) -> Result<Vec<PostRecord>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        ThreadscopeError::InvalidInput(format!("Invalid JSON snapshot {}: {}", path.display(), e))
    })
}

/// Cumulative CSV backup in spreadsheet row layout
///
/// Publishing merges the new records in front of the existing rows, keeps the
/// first row for each `post_id` and sorts newest first.
#[derive(Debug, Clone)]
pub struct CsvBackupSink {
    path: PathBuf,
}

impl CsvBackupSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(BACKUP_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for CsvBackupSink {
    async fn publish(&mut self, records: &[PostRecord]) -> Result<()> {
        let existing = if self.path.exists() {
            read_backup(&self.path)?
        } else {
            Vec::new()
        };

        let merged = merge_records(records, existing);
        write_atomic(&self.path, render_csv(&merged).as_bytes())?;

        tracing::info!("CSV backup updated, {} posts in total", merged.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "csv-backup"
    }
}

/// New records first, first occurrence of each id kept, newest first
pub fn merge_records(new: &[PostRecord], existing: Vec<PostRecord>) -> Vec<PostRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<PostRecord> = new
        .iter()
        .cloned()
        .chain(existing)
        .filter(|record| seen.insert(record.post_id.clone()))
        .collect();

    // Stable, so rows with equal dates keep merge order. Unparseable dates sort last.
    merged.sort_by(|a, b| {
        let a = DateTime::parse_from_str(&a.post_date, TIMESTAMP_FORMAT).ok();
        let b = DateTime::parse_from_str(&b.post_date, TIMESTAMP_FORMAT).ok();
        b.cmp(&a)
    });
    merged
}

/// Parse a CSV backup written by [`CsvBackupSink`]
///
/// Columns are matched by header name; derived columns (`engagement`,
/// `engagement_rate`) are recomputed rather than read.
pub fn read_backup(path: &Path) -> Result<Vec<PostRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut rows = parse_csv(&content)
        .map_err(|e| ThreadscopeError::InvalidInput(format!("{}: {}", path.display(), e)))?
        .into_iter();

    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    if !header.iter().any(|h| h == "post_id") {
        return Err(ThreadscopeError::InvalidInput(format!(
            "{}: missing post_id column",
            path.display()
        )));
    }

    let column = |row: &[String], name: &str| -> String {
        header
            .iter()
            .position(|h| h == name)
            .and_then(|i| row.get(i))
            .cloned()
            .unwrap_or_default()
    };

    let records = rows
        .filter(|row| !(row.len() == 1 && row[0].is_empty()))
        .map(|row| PostRecord {
            post_id: column(&row, "post_id"),
            shortcode: column(&row, "shortcode"),
            post_date: column(&row, "post_date"),
            content: column(&row, "content"),
            is_quote: column(&row, "is_quote").eq_ignore_ascii_case("true"),
            media_type: column(&row, "media_type"),
            permalink: column(&row, "permalink"),
            metrics: PostMetrics {
                views: parse_count(&column(&row, "views")),
                likes: parse_count(&column(&row, "likes")),
                replies: parse_count(&column(&row, "replies")),
                reposts: parse_count(&column(&row, "reposts")),
                quotes: parse_count(&column(&row, "quotes")),
                shares: parse_count(&column(&row, "shares")),
            },
        })
        .collect();

    Ok(records)
}

fn parse_count(value: &str) -> u64 {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        .unwrap_or(0)
}

fn render_csv(records: &[PostRecord]) -> String {
    let mut out = String::new();
    push_row(&mut out, PostRecord::SHEET_HEADERS.iter().copied());
    for record in records {
        let row = record.to_sheet_row();
        push_row(&mut out, row.iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;

        if field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

fn parse_csv(content: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            other => field.push(other),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    Ok(rows)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

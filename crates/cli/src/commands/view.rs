use chrono::{DateTime, Utc};
use serde::Serialize;

use imgup_core::{Record, humanize_remaining};

/// Printable summary of a record. The blob itself is never printed.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub id: String,
    pub title: String,
    pub author: String,
    pub filename: String,
    pub size: usize,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub duration: u64,
    pub remaining: u64,
}

impl RecordView {
    pub fn new(record: &Record, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            author: record.author.clone(),
            filename: record.filename.clone(),
            size: record.len(),
            visible: record.visible,
            created_at: record.created_at,
            expires_at: record.expires_at(),
            duration: record.duration,
            remaining: record.remaining(now),
        }
    }

    /// One-line listing entry.
    pub fn line(&self) -> String {
        format!(
            "  {id} | {title} | {author} | {size} bytes | expires in {ttl}",
            id = self.id,
            title = self.title,
            author = self.author,
            size = self.size,
            ttl = humanize_remaining(self.remaining),
        )
    }
}

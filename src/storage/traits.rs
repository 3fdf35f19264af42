//! Result sink trait and error types
//!
//! This module defines the interface every persistence backend offers the
//! fetch executor, plus the record it is handed.

use crate::crawler::{ExtractedRecord, TIME_FORMAT};
use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One row handed to the sink: either a populated record or a failure marker
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub target_url: String,
    pub title: String,
    pub publish_time: String,
    pub content: String,
    pub source_type: String,
    pub crawl_time: String,
    pub success: bool,
    pub author: Option<String>,
    pub attachment_urls: Vec<String>,
    pub error_message: Option<String>,
}

impl SinkRecord {
    /// Row for a successfully extracted page
    pub fn success(record: &ExtractedRecord, crawl_time: NaiveDateTime) -> Self {
        Self {
            target_url: record.url.clone(),
            title: record.title.clone(),
            publish_time: record.publish_time.format(TIME_FORMAT).to_string(),
            content: record.content.clone(),
            source_type: record.source.clone(),
            crawl_time: crawl_time.format(TIME_FORMAT).to_string(),
            success: true,
            author: Some(record.author.clone()),
            attachment_urls: record.attachments.clone(),
            error_message: None,
        }
    }

    /// Row for a failed attempt; content fields stay empty
    pub fn failure(url: &str, source: &str, error: &str, crawl_time: NaiveDateTime) -> Self {
        let stamp = crawl_time.format(TIME_FORMAT).to_string();
        Self {
            target_url: url.to_string(),
            title: String::new(),
            publish_time: stamp.clone(),
            content: String::new(),
            source_type: source.to_string(),
            crawl_time: stamp,
            success: false,
            author: None,
            attachment_urls: Vec::new(),
            error_message: Some(error.to_string()),
        }
    }

    /// Checks the fields the table requires
    ///
    /// Title and content are only required on success; a failure row needs
    /// an error message instead.
    pub fn validate(&self) -> StorageResult<()> {
        let required = [
            ("target_url", &self.target_url),
            ("publish_time", &self.publish_time),
            ("source_type", &self.source_type),
            ("crawl_time", &self.crawl_time),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(StorageError::MissingField(name));
            }
        }

        if self.success {
            if self.title.trim().is_empty() {
                return Err(StorageError::MissingField("title"));
            }
            if self.content.trim().is_empty() {
                return Err(StorageError::MissingField("content"));
            }
        } else if self
            .error_message
            .as_deref()
            .map_or(true, |e| e.trim().is_empty())
        {
            return Err(StorageError::MissingField("error_msg"));
        }

        Ok(())
    }
}

/// Persists fetch outcomes
///
/// Must tolerate repeated saves of the same target (upsert keyed by URL).
/// Returns false, after logging, when the row could not be written.
pub trait ResultSink: Send + Sync {
    fn save(&self, record: &SinkRecord) -> bool;
}

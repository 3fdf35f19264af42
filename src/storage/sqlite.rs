//! SQLite result sink
//!
//! This module provides the SQLite-backed implementation of the ResultSink
//! trait and the read queries the CLI reports from.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, SinkRecord, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Row counts by crawl status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub succeeded: u64,
    pub failed: u64,
}

/// SQLite storage backend
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validates and upserts one row keyed by target URL
    ///
    /// A failure row never overwrites a stored success for the same URL.
    pub fn write(&self, record: &SinkRecord) -> StorageResult<()> {
        record.validate()?;

        let attachments = record.attachment_urls.join(",");
        self.conn().execute(
            "INSERT INTO crawl_records
                (target_url, title, publish_time, content, source_type, crawl_time,
                 crawl_status, author, attachment_urls, error_msg)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(target_url) DO UPDATE SET
                title = excluded.title,
                publish_time = excluded.publish_time,
                content = excluded.content,
                source_type = excluded.source_type,
                crawl_time = excluded.crawl_time,
                crawl_status = excluded.crawl_status,
                author = excluded.author,
                attachment_urls = excluded.attachment_urls,
                error_msg = excluded.error_msg
             WHERE crawl_records.crawl_status = 0 OR excluded.crawl_status = 1",
            params![
                record.target_url,
                record.title,
                record.publish_time,
                record.content,
                record.source_type,
                record.crawl_time,
                record.success as i64,
                record.author,
                attachments,
                record.error_message,
            ],
        )?;

        Ok(())
    }

    /// Reads back the stored row for a URL
    pub fn get(&self, target_url: &str) -> StorageResult<Option<SinkRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT target_url, title, publish_time, content, source_type, crawl_time,
                        crawl_status, author, attachment_urls, error_msg
                 FROM crawl_records WHERE target_url = ?1",
                params![target_url],
                |row| {
                    let attachments: Option<String> = row.get(8)?;
                    Ok(SinkRecord {
                        target_url: row.get(0)?,
                        title: row.get(1)?,
                        publish_time: row.get(2)?,
                        content: row.get(3)?,
                        source_type: row.get(4)?,
                        crawl_time: row.get(5)?,
                        success: row.get::<_, i64>(6)? == 1,
                        author: row.get(7)?,
                        attachment_urls: attachments
                            .filter(|joined| !joined.is_empty())
                            .map(|joined| joined.split(',').map(String::from).collect())
                            .unwrap_or_default(),
                        error_message: row.get(9)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    /// Counts stored rows by crawl status
    pub fn count_by_status(&self) -> StorageResult<StatusCounts> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT crawl_status, COUNT(*) FROM crawl_records GROUP BY crawl_status")?;

        let mut counts = StatusCounts::default();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            if status == 1 {
                counts.succeeded = count as u64;
            } else {
                counts.failed += count as u64;
            }
        }

        Ok(counts)
    }

    /// Counts successful rows per source type
    pub fn count_by_source(&self) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source_type, COUNT(*) FROM crawl_records
             WHERE crawl_status = 1 GROUP BY source_type ORDER BY source_type",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}

impl ResultSink for SqliteSink {
    fn save(&self, record: &SinkRecord) -> bool {
        match self.write(record) {
            Ok(()) => {
                tracing::debug!(url = %record.target_url, success = record.success, "Record stored");
                true
            }
            Err(e) => {
                tracing::error!(url = %record.target_url, "Failed to store record: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::ExtractedRecord;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn record(url: &str) -> ExtractedRecord {
        ExtractedRecord {
            url: url.to_string(),
            title: "运动会通知".to_string(),
            publish_time: at(8),
            content: "<p>正文</p>".to_string(),
            source: "校园官网".to_string(),
            author: "体育部".to_string(),
            attachments: vec![
                "file:///srv/notices/a.pdf".to_string(),
                "file:///srv/notices/b.doc".to_string(),
            ],
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let sink = SqliteSink::new_in_memory().unwrap();
        let url = "file:///srv/notices/1.html";

        assert!(sink.save(&SinkRecord::success(&record(url), at(10))));

        let stored = sink.get(url).unwrap().unwrap();
        assert!(stored.success);
        assert_eq!(stored.title, "运动会通知");
        assert_eq!(stored.publish_time, "2024-06-01 08:00:00");
        assert_eq!(stored.attachment_urls.len(), 2);
        assert_eq!(stored.author.as_deref(), Some("体育部"));
    }

    #[test]
    fn test_save_twice_is_upsert() {
        let sink = SqliteSink::new_in_memory().unwrap();
        let url = "file:///srv/notices/1.html";

        assert!(sink.save(&SinkRecord::failure(url, "校园官网", "timeout", at(9))));
        assert!(sink.save(&SinkRecord::success(&record(url), at(10))));
        assert!(sink.save(&SinkRecord::success(&record(url), at(11))));

        let counts = sink.count_by_status().unwrap();
        assert_eq!(counts, StatusCounts { succeeded: 1, failed: 0 });
        assert_eq!(sink.get(url).unwrap().unwrap().crawl_time, "2024-06-01 11:00:00");
    }

    #[test]
    fn test_failure_does_not_overwrite_success() {
        let sink = SqliteSink::new_in_memory().unwrap();
        let url = "file:///srv/notices/1.html";

        sink.save(&SinkRecord::success(&record(url), at(10)));
        assert!(sink.save(&SinkRecord::failure(url, "校园官网", "boom", at(12))));

        let stored = sink.get(url).unwrap().unwrap();
        assert!(stored.success);
        assert_eq!(stored.error_message, None);
    }

    #[test]
    fn test_invalid_row_is_rejected() {
        let sink = SqliteSink::new_in_memory().unwrap();
        let mut row = SinkRecord::success(&record("file:///srv/notices/1.html"), at(10));
        row.content = String::new();

        assert!(!sink.save(&row));
        assert!(sink.get("file:///srv/notices/1.html").unwrap().is_none());
    }

    #[test]
    fn test_count_by_source() {
        let sink = SqliteSink::new_in_memory().unwrap();
        sink.save(&SinkRecord::success(&record("file:///srv/notices/1.html"), at(10)));
        sink.save(&SinkRecord::success(&record("file:///srv/notices/2.html"), at(10)));
        sink.save(&SinkRecord::failure(
            "https://mp.weixin.qq.com/s/x",
            "微信公众号",
            "timeout",
            at(10),
        ));

        assert_eq!(
            sink.count_by_source().unwrap(),
            vec![("校园官网".to_string(), 2)]
        );
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db");

        {
            let sink = SqliteSink::new(&path).unwrap();
            sink.save(&SinkRecord::success(&record("file:///srv/notices/1.html"), at(10)));
        }

        let reopened = SqliteSink::new(&path).unwrap();
        assert_eq!(reopened.count_by_status().unwrap().succeeded, 1);
    }
}

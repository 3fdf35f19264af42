//! Database schema definitions
//!
//! This module contains the SQL schema for the harvested-records database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per detail page, upserted on every attempt
CREATE TABLE IF NOT EXISTS crawl_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    publish_time TEXT NOT NULL,
    content TEXT NOT NULL,
    source_type TEXT NOT NULL,
    crawl_time TEXT NOT NULL,
    crawl_status INTEGER NOT NULL,
    author TEXT,
    attachment_urls TEXT,
    error_msg TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_records_publish_time ON crawl_records(publish_time DESC);
CREATE INDEX IF NOT EXISTS idx_records_crawl_time ON crawl_records(crawl_time DESC);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

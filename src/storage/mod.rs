//! Storage module for persisting fetch outcomes
//!
//! Every fetch attempt, successful or not, is written through a
//! [`ResultSink`]. The SQLite sink upserts one row per target URL.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{SqliteSink, StatusCounts};
pub use traits::{ResultSink, SinkRecord, StorageError, StorageResult};

use std::path::Path;

/// Opens the SQLite sink named by the output configuration
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_sink(path: &Path) -> StorageResult<SqliteSink> {
    SqliteSink::new(path)
}

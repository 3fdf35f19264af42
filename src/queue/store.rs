//! Job store abstraction
//!
//! The store holds job records, a FIFO of ready job ids and a schedule of
//! ids waiting out their retry interval. Producers, workers, job processes
//! and the monitor all talk to the same store, each through its own
//! connection.

use crate::queue::job::{JobRecord, JobStatus};
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Shared job storage
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fails with [`QueueError::Unavailable`] when the store cannot be reached
    async fn ping(&self) -> QueueResult<()>;

    /// Stores a new job and appends it to the ready queue
    async fn enqueue(&self, record: &JobRecord) -> QueueResult<()>;

    /// Moves due scheduled jobs to the ready queue, then pops the oldest
    /// ready id
    async fn pop_job_id(&self, now: DateTime<Utc>) -> QueueResult<Option<String>>;

    /// Loads and decodes a job record
    async fn fetch(&self, id: &str) -> QueueResult<JobRecord>;

    /// Reads one raw field without decoding it
    async fn raw_field(&self, id: &str, field: &str) -> QueueResult<Option<Vec<u8>>>;

    /// Overwrites a job record
    async fn update(&self, record: &JobRecord) -> QueueResult<()>;

    /// Overwrites individual fields of an existing job without decoding it
    async fn write_raw_fields(
        &self,
        id: &str,
        fields: &[(&'static str, String)],
    ) -> QueueResult<()>;

    /// Parks a job until `due`, after which [`JobStore::pop_job_id`] may
    /// return it again
    async fn schedule_retry(&self, id: &str, due: DateTime<Utc>) -> QueueResult<()>;

    /// Reads a job's status, tolerating a record that no longer decodes
    ///
    /// A record whose other fields are corrupt still reports its status as
    /// long as the raw `status` bytes name one.
    async fn fetch_status(&self, id: &str) -> QueueResult<JobStatus> {
        match self.fetch(id).await {
            Ok(record) => Ok(record.status),
            Err(QueueError::Decode { id: bad, message }) => {
                tracing::warn!(job = %bad, "Job record does not decode ({}), reading raw status", message);
                self.raw_field(id, "status")
                    .await?
                    .and_then(|bytes| JobStatus::from_bytes_lossy(&bytes))
                    .ok_or(QueueError::Decode {
                        id: bad,
                        message: "unreadable status".to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }
}

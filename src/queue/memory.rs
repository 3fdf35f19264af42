//! In-process job store
//!
//! Holds the same raw field maps the Redis store would, so decoding and
//! corruption behave identically. Cloning shares the underlying state.

use crate::queue::job::{fields_to_raw, JobRecord};
use crate::queue::store::JobStore;
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, HashMap<String, Vec<u8>>>,
    ready: VecDeque<String>,
    scheduled: Vec<(DateTime<Utc>, String)>,
}

#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    state: Arc<Mutex<State>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the store going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Overwrites one raw field of a stored job
    pub fn corrupt_field(&self, id: &str, field: &str, bytes: &[u8]) {
        if let Some(fields) = self.lock().jobs.get_mut(id) {
            fields.insert(field.to_string(), bytes.to_vec());
        }
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.lock().scheduled.len()
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory store marked down".to_string()))
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> QueueResult<()> {
        self.check()
    }

    async fn enqueue(&self, record: &JobRecord) -> QueueResult<()> {
        self.check()?;
        let fields = fields_to_raw(&record.to_fields()?);
        let mut state = self.lock();
        state.jobs.insert(record.id.clone(), fields);
        state.ready.push_back(record.id.clone());
        Ok(())
    }

    async fn pop_job_id(&self, now: DateTime<Utc>) -> QueueResult<Option<String>> {
        self.check()?;
        let mut state = self.lock();

        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        state.scheduled = waiting;
        due.sort_by_key(|(at, _)| *at);
        state.ready.extend(due.into_iter().map(|(_, id)| id));

        Ok(state.ready.pop_front())
    }

    async fn fetch(&self, id: &str) -> QueueResult<JobRecord> {
        self.check()?;
        let fields = self.lock().jobs.get(id).cloned().unwrap_or_default();
        JobRecord::from_fields(id, &fields)
    }

    async fn raw_field(&self, id: &str, field: &str) -> QueueResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self
            .lock()
            .jobs
            .get(id)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn update(&self, record: &JobRecord) -> QueueResult<()> {
        self.check()?;
        let fields = fields_to_raw(&record.to_fields()?);
        self.lock()
            .jobs
            .entry(record.id.clone())
            .or_default()
            .extend(fields);
        Ok(())
    }

    async fn write_raw_fields(
        &self,
        id: &str,
        fields: &[(&'static str, String)],
    ) -> QueueResult<()> {
        self.check()?;
        let mut state = self.lock();
        let stored = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        stored.extend(fields_to_raw(fields));
        Ok(())
    }

    async fn schedule_retry(&self, id: &str, due: DateTime<Utc>) -> QueueResult<()> {
        self.check()?;
        let mut state = self.lock();
        state.scheduled.retain(|(_, scheduled)| scheduled != id);
        state.scheduled.push((due, id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::tests::sample_record;
    use crate::queue::job::JobStatus;
    use chrono::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let store = MemoryJobStore::new();
        let first = sample_record();
        let second = sample_record();
        store.enqueue(&first).await.unwrap();
        store.enqueue(&second).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.pop_job_id(now).await.unwrap(), Some(first.id));
        assert_eq!(store.pop_job_id(now).await.unwrap(), Some(second.id));
        assert_eq!(store.pop_job_id(now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scheduled_job_waits_until_due() {
        let store = MemoryJobStore::new();
        let record = sample_record();
        store.enqueue(&record).await.unwrap();
        let now = Utc::now();
        store.pop_job_id(now).await.unwrap();

        store
            .schedule_retry(&record.id, now + Duration::seconds(60))
            .await
            .unwrap();

        assert_eq!(store.pop_job_id(now).await.unwrap(), None);
        assert_eq!(store.scheduled_len(), 1);
        assert_eq!(
            store.pop_job_id(now + Duration::seconds(60)).await.unwrap(),
            Some(record.id)
        );
        assert_eq!(store.scheduled_len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_status_still_readable_when_lossy() {
        let store = MemoryJobStore::new();
        let record = sample_record();
        store.enqueue(&record).await.unwrap();

        store.corrupt_field(&record.id, "meta", b"\xff\xfe");
        assert!(matches!(
            store.fetch(&record.id).await,
            Err(QueueError::Decode { .. })
        ));
        assert_eq!(
            store.fetch_status(&record.id).await.unwrap(),
            JobStatus::Queued
        );

        store.corrupt_field(&record.id, "status", b"\xff\xfe");
        assert!(matches!(
            store.fetch_status(&record.id).await,
            Err(QueueError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryJobStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(QueueError::Unavailable(_))));
        assert!(store.enqueue(&sample_record()).await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.fetch("missing").await,
            Err(QueueError::JobNotFound(_))
        ));
    }
}

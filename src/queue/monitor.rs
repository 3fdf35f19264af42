use crate::crawler::FetchOutcome;
use crate::queue::job::{JobHandle, JobRecord, JobStatus};
use crate::queue::store::JobStore;
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::QueueError;
use std::sync::Arc;
use std::time::Duration;

/// Collects the outcomes of submitted jobs
///
/// Sweeps every pending handle, sleeps, and sweeps again until all jobs
/// are terminal or the time budget runs out.
pub struct JobMonitor {
    store: Arc<dyn JobStore>,
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl JobMonitor {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Waits for the given jobs, returning outcomes in completion order
    ///
    /// Whatever finished before `timeout` is returned; jobs still pending
    /// are left running and simply missing from the result.
    pub async fn await_all(&self, handles: &[JobHandle], timeout: Duration) -> Vec<FetchOutcome> {
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|budget| self.clock.now().checked_add_signed(budget));

        let mut pending: Vec<&JobHandle> = handles.iter().collect();
        let mut outcomes = Vec::with_capacity(handles.len());

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());

            for handle in pending {
                match self.store.fetch_status(&handle.id).await {
                    Ok(status) if status.is_terminal() => {
                        outcomes.push(self.collect(handle, status).await);
                    }
                    Ok(_) => still_pending.push(handle),
                    Err(QueueError::JobNotFound(_)) => {
                        tracing::error!(job = %handle.id, "Job record disappeared, giving up on it");
                    }
                    Err(e) => {
                        tracing::warn!(job = %handle.id, "Status check failed: {}", e);
                        still_pending.push(handle);
                    }
                }
            }

            pending = still_pending;
            if pending.is_empty() {
                break;
            }

            if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                tracing::warn!(
                    "Monitor timed out with {} of {} jobs unfinished",
                    pending.len(),
                    handles.len()
                );
                break;
            }

            tracing::debug!("{} jobs pending", pending.len());
            self.sleeper.sleep(self.interval).await;
        }

        tracing::info!("{} of {} jobs finished", outcomes.len(), handles.len());
        outcomes
    }

    /// Reads a terminal job's outcome; a record that no longer decodes
    /// falls back to its raw `result` and `error` fields
    async fn collect(&self, handle: &JobHandle, status: JobStatus) -> FetchOutcome {
        match self.store.fetch(&handle.id).await {
            Ok(record) => outcome_from_record(record),
            Err(e) => {
                tracing::warn!(job = %handle.id, "Job record does not decode ({}), reading raw result", e);
                let result: Option<FetchOutcome> = self
                    .raw_text(&handle.id, "result")
                    .await
                    .and_then(|text| serde_json::from_str(&text).ok());
                if status == JobStatus::Succeeded {
                    return result.unwrap_or_else(|| FetchOutcome {
                        target: handle.target.clone(),
                        success: true,
                        payload: None,
                        error_message: None,
                        attempt_count: 0,
                    });
                }

                let error = self
                    .raw_text(&handle.id, "error")
                    .await
                    .unwrap_or_else(|| format!("job result unreadable: {}", e));
                match result {
                    Some(mut outcome) => {
                        outcome.success = false;
                        outcome.error_message = Some(error);
                        outcome
                    }
                    None => FetchOutcome::failed(handle.target.clone(), error, 0),
                }
            }
        }
    }

    async fn raw_text(&self, id: &str, field: &str) -> Option<String> {
        self.store
            .raw_field(id, field)
            .await
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|text| !text.is_empty())
    }
}

fn outcome_from_record(record: JobRecord) -> FetchOutcome {
    match (record.status, record.result) {
        (JobStatus::Succeeded, Some(outcome)) => outcome,
        (JobStatus::Succeeded, None) => FetchOutcome {
            target: record.target,
            success: true,
            payload: None,
            error_message: None,
            attempt_count: 0,
        },
        (_, Some(mut outcome)) => {
            // The job's own error is newer than the last fetch outcome
            outcome.success = false;
            if record.error.is_some() {
                outcome.error_message = record.error;
            }
            outcome
        }
        (_, None) => FetchOutcome::failed(
            record.target,
            record.error.unwrap_or_else(|| "job failed".to_string()),
            0,
        ),
    }
}

//! Job consumer
//!
//! A worker pops one job id at a time and hands it to an
//! [`IsolatedExecutor`], which runs the job body in its own OS process and
//! reports only how that process ended. The job process writes its own
//! result; the worker only steps in when the process died before it could.

use crate::config::{hash_config, validate, Config};
use crate::crawler::FetchExecutor;
use crate::queue::job::{JobRecord, JobStatus};
use crate::queue::store::JobStore;
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

/// How an isolated job process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Success,
    Failed(Option<i32>),
    Killed,
}

impl ChildExit {
    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else if let Some(code) = status.code() {
            Self::Failed(Some(code))
        } else {
            // No exit code means a signal ended the process
            Self::Killed
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Success => "exited cleanly".to_string(),
            Self::Failed(Some(code)) => format!("JobCrash: job process exited with code {}", code),
            Self::Failed(None) => "JobCrash: job process could not be run".to_string(),
            Self::Killed => "JobCrash: job process was killed".to_string(),
        }
    }
}

/// Runs one job by id in a context that cannot take the caller down
#[async_trait]
pub trait IsolatedExecutor: Send + Sync {
    async fn execute(&self, job_id: &str) -> QueueResult<ChildExit>;
}

/// Re-executes a binary as `<program> <args..> run-job <id>` and waits
///
/// The job process enforces the job timeout itself. `kill_after` is a
/// watchdog for processes that stop responding entirely; it should be
/// longer than the job timeout.
#[derive(Debug, Clone)]
pub struct ProcessIsolation {
    program: PathBuf,
    args: Vec<OsString>,
    kill_after: Option<Duration>,
}

impl ProcessIsolation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            kill_after: None,
        }
    }

    /// Isolation that re-runs the currently executing binary
    pub fn current_exe() -> QueueResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Adds an argument placed before the `run-job` subcommand
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_kill_after(mut self, limit: Duration) -> Self {
        self.kill_after = Some(limit);
        self
    }
}

#[async_trait]
impl IsolatedExecutor for ProcessIsolation {
    async fn execute(&self, job_id: &str) -> QueueResult<ChildExit> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("run-job")
            .arg(job_id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(job = %job_id, pid = ?child.id(), "Job process started");

        let status = match self.kill_after {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    tracing::warn!(job = %job_id, "Job process unresponsive after {:?}, killing", limit);
                    child.kill().await?;
                    return Ok(ChildExit::Killed);
                }
            },
            None => child.wait().await?,
        };

        Ok(ChildExit::from_status(status))
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Dispatched { job_id: String, exit: ChildExit },
}

/// Single-job-at-a-time queue consumer
pub struct Worker {
    store: Arc<dyn JobStore>,
    isolation: Arc<dyn IsolatedExecutor>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        isolation: Arc<dyn IsolatedExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            isolation,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            poll_interval,
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

    /// Pops at most one job and blocks until its process has ended
    pub async fn run_once(&self) -> QueueResult<PollOutcome> {
        let now = self.clock.now().with_timezone(&Utc);
        let Some(job_id) = self.store.pop_job_id(now).await? else {
            return Ok(PollOutcome::Idle);
        };

        tracing::info!(job = %job_id, "Dispatching job");

        let exit = match self.isolation.execute(&job_id).await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(job = %job_id, "Failed to launch job process: {}", e);
                ChildExit::Failed(None)
            }
        };

        if exit == ChildExit::Success {
            tracing::info!(job = %job_id, "Job process finished");
        } else {
            self.reconcile(&job_id, exit).await;
        }

        Ok(PollOutcome::Dispatched { job_id, exit })
    }

    /// Records a dead job process as a failed attempt unless it already
    /// reached a terminal state
    async fn reconcile(&self, job_id: &str, exit: ChildExit) {
        let now = self.clock.now().with_timezone(&Utc);
        let mut record = match self.store.fetch(job_id).await {
            Ok(record) => record,
            Err(QueueError::Decode { message, .. }) => {
                let error = format!("{} (record does not decode: {})", exit.describe(), message);
                if let Err(e) = fail_undecodable(self.store.as_ref(), job_id, error, now).await {
                    tracing::error!(job = %job_id, "Cannot mark undecodable job failed: {}", e);
                }
                return;
            }
            Err(e) => {
                tracing::error!(job = %job_id, "Cannot reconcile job after {}: {}", exit.describe(), e);
                return;
            }
        };

        if record.status.is_terminal() {
            return;
        }

        tracing::error!(job = %job_id, "Job attempt lost: {}", exit.describe());

        // Died before it could mark itself running
        if record.status == JobStatus::Queued {
            record.attempts += 1;
        }

        if let Err(e) = record_failed_attempt(self.store.as_ref(), record, exit.describe(), now).await {
            tracing::error!(job = %job_id, "Failed to record lost attempt: {}", e);
        }
    }

    /// Polls until the ready queue is empty
    ///
    /// # Returns
    ///
    /// Number of jobs dispatched
    pub async fn run_burst(&self) -> QueueResult<usize> {
        let mut dispatched = 0;
        while let PollOutcome::Dispatched { .. } = self.run_once().await? {
            dispatched += 1;
        }
        tracing::info!("Burst finished, {} jobs dispatched", dispatched);
        Ok(dispatched)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped
    ///
    /// Store errors are logged and retried after the poll interval; they
    /// never end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut dispatched = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(PollOutcome::Dispatched { .. }) => {
                    dispatched += 1;
                    continue;
                }
                Ok(PollOutcome::Idle) => {}
                Err(e) => tracing::error!("Queue poll failed: {}", e),
            }

            tokio::select! {
                _ = self.sleeper.sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker stopped after {} jobs", dispatched);
        dispatched
    }
}

/// Counts a failed execution against the queue retry policy
///
/// While the budget allows, the job goes back to `Queued` and becomes
/// poppable after the retry interval; otherwise it ends `Failed`.
pub async fn record_failed_attempt(
    store: &dyn JobStore,
    mut record: JobRecord,
    error: String,
    now: DateTime<Utc>,
) -> QueueResult<JobStatus> {
    record.error = Some(error);

    if record.can_retry() {
        record.status = JobStatus::Queued;
        store.update(&record).await?;
        let due = now + chrono::Duration::seconds(record.retry.interval_secs as i64);
        store.schedule_retry(&record.id, due).await?;
        tracing::warn!(
            job = %record.id,
            attempt = record.attempts,
            "Job attempt failed, retrying in {}s",
            record.retry.interval_secs
        );
        Ok(JobStatus::Queued)
    } else {
        record.status = JobStatus::Failed;
        record.ended_at = Some(now);
        store.update(&record).await?;
        tracing::error!(
            job = %record.id,
            attempts = record.attempts,
            "Job failed permanently: {}",
            record.error.as_deref().unwrap_or("")
        );
        Ok(JobStatus::Failed)
    }
}

/// Fails a job whose record no longer decodes, touching raw fields only
///
/// Such a job can never be run again, so no retry is scheduled. A raw
/// status that already names a terminal state is left as it is.
pub async fn fail_undecodable(
    store: &dyn JobStore,
    job_id: &str,
    error: String,
    now: DateTime<Utc>,
) -> QueueResult<JobStatus> {
    let status = store
        .raw_field(job_id, "status")
        .await?
        .and_then(|bytes| JobStatus::from_bytes_lossy(&bytes));
    if let Some(status) = status.filter(JobStatus::is_terminal) {
        return Ok(status);
    }

    let attempts = store
        .raw_field(job_id, "attempts")
        .await?
        .and_then(|bytes| String::from_utf8_lossy(&bytes).trim().parse::<u32>().ok())
        .unwrap_or(0);
    // A running attempt has already been counted
    let attempts = match status {
        Some(JobStatus::Running) => attempts.max(1),
        _ => attempts.saturating_add(1),
    };

    store
        .write_raw_fields(
            job_id,
            &[
                ("status", JobStatus::Failed.as_str().to_string()),
                ("attempts", attempts.to_string()),
                ("ended_at", now.to_rfc3339()),
                ("error", error.clone()),
            ],
        )
        .await?;
    tracing::error!(job = %job_id, attempts, "Job failed permanently: {}", error);
    Ok(JobStatus::Failed)
}

/// Job process entry point: runs one job and writes its state back
///
/// The caller owns a fresh store connection. `build` turns the job's
/// configuration snapshot into an executor, so nothing is read from the
/// worker's own configuration.
///
/// # Returns
///
/// The status written for this attempt. `Err` only when the job record
/// cannot be read or written at all.
pub async fn run_job<F>(
    store: &dyn JobStore,
    job_id: &str,
    clock: &dyn Clock,
    build: F,
) -> QueueResult<JobStatus>
where
    F: FnOnce(Arc<Config>) -> crate::Result<FetchExecutor>,
{
    let now = || clock.now().with_timezone(&Utc);
    let mut record = match store.fetch(job_id).await {
        Ok(record) => record,
        Err(QueueError::Decode { message, .. }) => {
            let error = format!("Job record does not decode: {}", message);
            return fail_undecodable(store, job_id, error, now()).await;
        }
        Err(e) => return Err(e),
    };

    if record.status.is_terminal() {
        tracing::warn!(job = %job_id, status = %record.status, "Job already finished, skipping");
        return Ok(record.status);
    }

    if let Err(e) = validate(&record.meta.config) {
        record.status = JobStatus::Failed;
        record.error = Some(format!("Invalid configuration snapshot: {}", e));
        record.ended_at = Some(now());
        store.update(&record).await?;
        return Ok(JobStatus::Failed);
    }

    match hash_config(&record.meta.config) {
        Ok(hash) if hash == record.meta.config_hash => {}
        Ok(hash) => tracing::warn!(
            job = %job_id,
            expected = %record.meta.config_hash,
            actual = %hash,
            "Configuration snapshot hash mismatch"
        ),
        Err(e) => tracing::warn!(job = %job_id, "Cannot hash configuration snapshot: {}", e),
    }

    record.status = JobStatus::Running;
    record.attempts += 1;
    store.update(&record).await?;
    tracing::info!(job = %job_id, attempt = record.attempts, url = %record.target.url, "Job started");

    let executor = match build(Arc::new(record.meta.config.clone())) {
        Ok(executor) => executor,
        Err(e) => {
            let error = format!("Executor setup failed: {}", e);
            return record_failed_attempt(store, record, error, now()).await;
        }
    };

    let limit = Duration::from_secs(record.timeout_secs);
    match tokio::time::timeout(limit, executor.fetch(&record.target)).await {
        Ok(outcome) if outcome.success => {
            record.status = JobStatus::Succeeded;
            record.ended_at = Some(now());
            record.error = None;
            record.result = Some(outcome);
            store.update(&record).await?;
            tracing::info!(job = %job_id, "Job succeeded");
            Ok(JobStatus::Succeeded)
        }
        Ok(outcome) if outcome.attempt_count == 0 => {
            // Rejected before any fetch; another attempt would be rejected too
            record.status = JobStatus::Failed;
            record.ended_at = Some(now());
            record.error = outcome.error_message.clone();
            record.result = Some(outcome);
            store.update(&record).await?;
            tracing::warn!(job = %job_id, "Job target rejected: {}", record.error.as_deref().unwrap_or(""));
            Ok(JobStatus::Failed)
        }
        Ok(outcome) => {
            let error = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "fetch failed".to_string());
            record.result = Some(outcome);
            record_failed_attempt(store, record, error, now()).await
        }
        Err(_) => {
            let error = format!("JobTimeout: exceeded {}s", record.timeout_secs);
            record_failed_attempt(store, record, error, now()).await
        }
    }
}

/// Maps a lookup failure in the job process to its exit code
pub fn exit_code(error: &QueueError) -> i32 {
    match error {
        QueueError::JobNotFound(_) => 3,
        QueueError::Unavailable(_) | QueueError::Redis(_) => 4,
        _ => 1,
    }
}

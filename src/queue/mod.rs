//! Job queue module
//!
//! The asynchronous crawl path:
//! - [`JobProducer`] turns admitted targets into queued jobs
//! - [`Worker`] consumes them, one isolated OS process per job
//! - [`JobMonitor`] polls a batch of jobs until they finish or time runs out
//!
//! Jobs live in a [`JobStore`]; Redis in production, memory in tests.

mod job;
mod memory;
mod monitor;
mod producer;
mod redis_store;
mod store;
mod worker;

pub use job::{JobHandle, JobMeta, JobRecord, JobStatus, RetryPolicy};
pub use memory::MemoryJobStore;
pub use monitor::JobMonitor;
pub use producer::JobProducer;
pub use redis_store::RedisJobStore;
pub use store::JobStore;
pub use worker::{
    exit_code, fail_undecodable, record_failed_attempt, run_job, ChildExit, IsolatedExecutor,
    PollOutcome, ProcessIsolation, Worker,
};

use crate::crawler::{discover_detail_urls, CrawlTarget, FetchOutcome, PageRenderer};
use crate::policy::PolicyEngine;
use std::time::Duration;

/// Discovers detail pages of a list page as crawl targets
pub async fn discover_targets(
    policy: &PolicyEngine,
    renderer: &dyn PageRenderer,
    list_url: &str,
    source: &str,
) -> Vec<CrawlTarget> {
    discover_detail_urls(policy, renderer, list_url, source)
        .await
        .into_iter()
        .map(|url| CrawlTarget::new(url, source))
        .collect()
}

/// Crawls a list page through the job queue
///
/// Checks the store first; if it is unreachable nothing is discovered or
/// submitted and the result is empty. Otherwise discovers detail pages,
/// submits one job per admitted URL and waits up to `timeout` for them.
///
/// # Returns
///
/// Outcomes of every job that finished in time, successful or not
pub async fn batch_crawl_async(
    producer: &JobProducer,
    monitor: &JobMonitor,
    renderer: &dyn PageRenderer,
    list_url: &str,
    source: &str,
    timeout: Duration,
) -> Vec<FetchOutcome> {
    if let Err(e) = producer.store().ping().await {
        tracing::error!(url = %list_url, "Job queue unavailable, cannot crawl asynchronously: {}", e);
        return Vec::new();
    }

    let targets = discover_targets(producer.policy(), renderer, list_url, source).await;
    if targets.is_empty() {
        tracing::error!(url = %list_url, "No detail pages found");
        return Vec::new();
    }

    let handles = match producer.submit(&targets).await {
        Ok(handles) => handles,
        Err(e) => {
            tracing::error!(url = %list_url, "Failed to enqueue jobs: {}", e);
            return Vec::new();
        }
    };

    if handles.is_empty() {
        tracing::warn!(url = %list_url, "No jobs enqueued");
        return Vec::new();
    }

    tracing::info!("Monitoring {} jobs", handles.len());
    monitor.await_all(&handles, timeout).await
}

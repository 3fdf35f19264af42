use crate::config::hash_config;
use crate::crawler::CrawlTarget;
use crate::policy::PolicyEngine;
use crate::queue::job::{JobHandle, JobMeta, JobRecord, RetryPolicy};
use crate::queue::store::JobStore;
use crate::time::{Clock, SystemClock};
use crate::QueueResult;
use chrono::Utc;
use std::sync::Arc;

/// Turns crawl targets into queued jobs
///
/// Targets outside their source's allow-list are dropped here, so no job
/// ever exists for them. Each job carries a full copy of the configuration
/// and its hash.
pub struct JobProducer {
    policy: Arc<PolicyEngine>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobProducer {
    pub fn new(policy: Arc<PolicyEngine>, store: Arc<dyn JobStore>) -> Self {
        Self {
            policy,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submits one job per admitted target, in input order
    ///
    /// # Returns
    ///
    /// * `Ok(handles)` - One handle per enqueued job; may be shorter than
    ///   `targets`
    /// * `Err(QueueError)` - The store failed; jobs enqueued before the
    ///   failure stay queued
    pub async fn submit(&self, targets: &[CrawlTarget]) -> QueueResult<Vec<JobHandle>> {
        let config = self.policy.config();
        let meta = JobMeta {
            config: config.clone(),
            config_hash: hash_config(config)?,
        };
        let retry = RetryPolicy::from_config(&config.queue);
        let timeout_secs = config.queue.job_timeout_secs;

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            if !self.policy.is_allowed(&target.url, &target.source) {
                tracing::info!(url = %target.url, source = %target.source, "Skipping disallowed target");
                continue;
            }

            let record = JobRecord::new(
                target.clone(),
                retry,
                meta.clone(),
                timeout_secs,
                self.clock.now().with_timezone(&Utc),
            );
            self.store.enqueue(&record).await?;
            tracing::debug!(job = %record.id, url = %target.url, "Job enqueued");
            handles.push(record.handle());
        }

        tracing::info!(
            "Enqueued {} of {} targets on '{}'",
            handles.len(),
            targets.len(),
            config.queue.queue_name
        );
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use crate::queue::{JobStatus, MemoryJobStore};
    use crate::QueueError;

    fn producer(store: &MemoryJobStore) -> JobProducer {
        let policy = Arc::new(PolicyEngine::new(Arc::new(sample_config())));
        JobProducer::new(policy, Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_disallowed_targets_get_no_job() {
        let store = MemoryJobStore::new();
        let targets = vec![
            CrawlTarget::new("https://mp.weixin.qq.com/s/a", "微信公众号"),
            CrawlTarget::new("https://evil.example.com/x", "微信公众号"),
            CrawlTarget::new("file:///srv/notices/1.html", "校园官网"),
        ];

        let handles = producer(&store).submit(&targets).await.unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].target, targets[0]);
        assert_eq!(handles[1].target, targets[2]);
        assert_eq!(store.job_count(), 2);
        assert_eq!(store.ready_len(), 2);
    }

    #[tokio::test]
    async fn test_job_carries_config_snapshot() {
        let store = MemoryJobStore::new();
        let target = CrawlTarget::new("https://mp.weixin.qq.com/s/a", "微信公众号");
        let handles = producer(&store).submit(&[target]).await.unwrap();

        let record = store.fetch(&handles[0].id).await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.retry.max, 3);
        assert_eq!(record.meta.config_hash, hash_config(&sample_config()).unwrap());
    }

    #[tokio::test]
    async fn test_store_down_is_error() {
        let store = MemoryJobStore::new();
        store.set_available(false);
        let target = CrawlTarget::new("https://mp.weixin.qq.com/s/a", "微信公众号");
        let result = producer(&store).submit(&[target]).await;
        assert!(matches!(result, Err(QueueError::Unavailable(_))));
    }
}

//! Job lifecycle through the in-memory store
//!
//! Job bodies run in-process through [`InlineIsolation`]; the worker,
//! producer and monitor are the production ones.

use crate::common::{detail_html, memory_sink, test_config, SOURCE};
use async_trait::async_trait;
use notice_harvest::config::Config;
use notice_harvest::crawler::{FetchExecutor, HttpRenderer};
use notice_harvest::queue::{
    run_job, ChildExit, IsolatedExecutor, JobMonitor, JobProducer, JobStatus, JobStore,
    MemoryJobStore, PollOutcome, Worker,
};
use notice_harvest::storage::{ResultSink, SqliteSink};
use notice_harvest::time::{RecordingSleeper, SystemClock};
use notice_harvest::{CrawlTarget, PolicyEngine, QueueResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Runs job bodies in this process against the shared store
///
/// Jobs whose id is in `kill` are marked running and then reported as
/// killed, as if the OS had terminated the job process mid-fetch.
struct InlineIsolation {
    store: MemoryJobStore,
    sink: Arc<SqliteSink>,
    kill: Mutex<HashSet<String>>,
}

impl InlineIsolation {
    fn new(store: &MemoryJobStore, sink: Arc<SqliteSink>) -> Self {
        Self {
            store: store.clone(),
            sink,
            kill: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl IsolatedExecutor for InlineIsolation {
    async fn execute(&self, job_id: &str) -> QueueResult<ChildExit> {
        if self.kill.lock().unwrap().remove(job_id) {
            let mut record = self.store.fetch(job_id).await?;
            record.status = JobStatus::Running;
            record.attempts += 1;
            self.store.update(&record).await?;
            return Ok(ChildExit::Killed);
        }

        let sink: Arc<dyn ResultSink> = self.sink.clone();
        let build = move |config: Arc<Config>| -> notice_harvest::Result<FetchExecutor> {
            let renderer = HttpRenderer::new(&config.crawler)?;
            Ok(
                FetchExecutor::new(Arc::new(PolicyEngine::new(config)), Arc::new(renderer), sink)
                    .with_sleeper(Arc::new(RecordingSleeper::new())),
            )
        };

        match run_job(&self.store, job_id, &SystemClock, build).await {
            Ok(_) => Ok(ChildExit::Success),
            Err(_) => Ok(ChildExit::Failed(Some(1))),
        }
    }
}

async fn mount_details(server: &MockServer) {
    for n in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/notice/{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html(&format!("通知{}", n))))
            .mount(server)
            .await;
    }
}

fn targets(server: &MockServer) -> Vec<CrawlTarget> {
    vec![
        CrawlTarget::new(format!("{}/notice/1", server.uri()), SOURCE),
        CrawlTarget::new("https://elsewhere.example.org/notice/9", SOURCE),
        CrawlTarget::new(format!("{}/notice/2", server.uri()), SOURCE),
    ]
}

fn producer(config: Config, store: &MemoryJobStore) -> JobProducer {
    JobProducer::new(
        Arc::new(PolicyEngine::new(Arc::new(config))),
        Arc::new(store.clone()),
    )
}

fn worker(store: &MemoryJobStore, isolation: Arc<InlineIsolation>) -> Worker {
    Worker::new(Arc::new(store.clone()), isolation, Duration::from_millis(10))
        .with_sleeper(Arc::new(RecordingSleeper::new()))
}

#[tokio::test]
async fn test_job_lifecycle() {
    let server = MockServer::start().await;
    mount_details(&server).await;

    let store = MemoryJobStore::new();
    let sink = memory_sink();

    let handles = producer(test_config(&server, 3, 600), &store)
        .submit(&targets(&server))
        .await
        .unwrap();
    assert_eq!(handles.len(), 2);

    let isolation = Arc::new(InlineIsolation::new(&store, sink.clone()));
    assert_eq!(worker(&store, isolation).run_burst().await.unwrap(), 2);

    let monitor = JobMonitor::new(Arc::new(store.clone()), Duration::from_secs(1));
    let outcomes = monitor.await_all(&handles, Duration::from_secs(5)).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.success));
    for handle in &handles {
        let record = store.fetch(&handle.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempts, 1);
        assert!(record.ended_at.is_some());
        assert!(sink.get(&handle.target.url).unwrap().unwrap().success);
    }
}

#[tokio::test]
async fn test_killed_job_fails_and_worker_keeps_polling() {
    let server = MockServer::start().await;
    mount_details(&server).await;

    let store = MemoryJobStore::new();
    let handles = producer(test_config(&server, 0, 600), &store)
        .submit(&targets(&server))
        .await
        .unwrap();

    let isolation = Arc::new(InlineIsolation::new(&store, memory_sink()));
    isolation.kill.lock().unwrap().insert(handles[0].id.clone());

    let worker = worker(&store, isolation);
    assert_eq!(
        worker.run_once().await.unwrap(),
        PollOutcome::Dispatched {
            job_id: handles[0].id.clone(),
            exit: ChildExit::Killed
        }
    );
    assert!(matches!(
        worker.run_once().await.unwrap(),
        PollOutcome::Dispatched {
            exit: ChildExit::Success,
            ..
        }
    ));
    assert_eq!(worker.run_once().await.unwrap(), PollOutcome::Idle);

    let killed = store.fetch(&handles[0].id).await.unwrap();
    assert_eq!(killed.status, JobStatus::Failed);
    assert_eq!(killed.attempts, 1);

    let monitor = JobMonitor::new(Arc::new(store.clone()), Duration::from_secs(1));
    let outcomes = monitor.await_all(&handles, Duration::from_secs(5)).await;

    assert_eq!(outcomes.len(), 2);
    let failed = outcomes.iter().find(|o| o.target == handles[0].target).unwrap();
    assert!(!failed.success);
    assert!(failed.error_message.as_deref().unwrap().contains("killed"));
    assert!(outcomes.iter().any(|o| o.target == handles[1].target && o.success));
}

#[tokio::test]
async fn test_killed_job_is_retried_by_queue() {
    let server = MockServer::start().await;
    mount_details(&server).await;

    let store = MemoryJobStore::new();
    let handles = producer(test_config(&server, 1, 600), &store)
        .submit(&targets(&server)[..1])
        .await
        .unwrap();

    let isolation = Arc::new(InlineIsolation::new(&store, memory_sink()));
    isolation.kill.lock().unwrap().insert(handles[0].id.clone());
    worker(&store, isolation).run_once().await.unwrap();

    let record = store.fetch(&handles[0].id).await.unwrap();
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(store.scheduled_len(), 1);
    assert_eq!(store.ready_len(), 0);
}

#[tokio::test]
async fn test_job_timeout_is_enforced_inside_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notice/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_html("慢"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store = MemoryJobStore::new();
    let handles = producer(test_config(&server, 0, 1), &store)
        .submit(&targets(&server)[..1])
        .await
        .unwrap();

    let isolation = Arc::new(InlineIsolation::new(&store, memory_sink()));
    worker(&store, isolation).run_once().await.unwrap();

    let record = store.fetch(&handles[0].id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().starts_with("JobTimeout"));
}

#[tokio::test]
async fn test_corrupt_job_status_is_recovered_by_monitor() {
    let server = MockServer::start().await;
    mount_details(&server).await;

    let store = MemoryJobStore::new();
    let handles = producer(test_config(&server, 3, 600), &store)
        .submit(&targets(&server)[..1])
        .await
        .unwrap();

    let isolation = Arc::new(InlineIsolation::new(&store, memory_sink()));
    worker(&store, isolation).run_burst().await.unwrap();
    store.corrupt_field(&handles[0].id, "submitted_at", b"\xc3\x28");

    let monitor = JobMonitor::new(Arc::new(store.clone()), Duration::from_secs(1));
    let outcomes = monitor.await_all(&handles, Duration::from_secs(5)).await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].payload.as_ref().unwrap().title, "通知1");
}

#[tokio::test]
async fn test_undecodable_job_ends_failed() {
    let server = MockServer::start().await;
    mount_details(&server).await;

    let store = MemoryJobStore::new();
    let handles = producer(test_config(&server, 3, 600), &store)
        .submit(&targets(&server)[..1])
        .await
        .unwrap();
    store.corrupt_field(&handles[0].id, "meta", b"\xff\xfe");

    let isolation = Arc::new(InlineIsolation::new(&store, memory_sink()));
    let worker = worker(&store, isolation);
    assert_eq!(worker.run_burst().await.unwrap(), 1);
    assert_eq!(
        store.fetch_status(&handles[0].id).await.unwrap(),
        JobStatus::Failed
    );
    assert_eq!(store.scheduled_len(), 0);

    let monitor = JobMonitor::new(Arc::new(store.clone()), Duration::from_secs(1));
    let outcomes = monitor.await_all(&handles, Duration::from_secs(5)).await;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert!(outcomes[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Job record does not decode"));
}

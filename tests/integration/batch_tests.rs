//! List-page crawls, in-process and through the queue

use crate::common::{detail_html, executor, memory_sink, test_config, SOURCE};
use notice_harvest::crawler::{BatchCrawler, HttpRenderer};
use notice_harvest::dedup::{DedupCache, MemoryDedupCache};
use notice_harvest::queue::{batch_crawl_async, JobMonitor, JobProducer, MemoryJobStore};
use notice_harvest::PolicyEngine;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Two list pages holding three detail pages and one off-site link
async fn mount_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<ul>
                <li><a class="item" href="/notice/1">一</a></li>
                <li><a class="item" href="{base}/notice/2">二</a></li>
                <li><a class="item" href="https://elsewhere.example.org/x">外站</a></li>
            </ul>
            <a class="next" href="/list2">下一页</a>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/list2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<ul>
                <li><a class="item" href="/notice/2">二</a></li>
                <li><a class="item" href="/notice/3">三</a></li>
            </ul>
            <a class="next" href="/list">回到第一页</a>"#,
        ))
        .mount(server)
        .await;

    for n in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/notice/{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html(&format!("通知{}", n))))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_batch_crawl_follows_pages_and_skips_seen_urls() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = Arc::new(test_config(&server, 3, 600));
    let executor = Arc::new(executor(config, memory_sink()));

    let dedup = Arc::new(MemoryDedupCache::new());
    let seen = format!("{}/notice/1", server.uri());
    dedup.mark_processed(&seen, 3600).await.unwrap();

    let crawler = BatchCrawler::new(executor, Some(dedup.clone() as Arc<dyn DedupCache>));
    let outcomes = crawler.run(&format!("{}/list", server.uri()), SOURCE).await;

    let titles: Vec<_> = outcomes
        .iter()
        .map(|o| o.payload.as_ref().unwrap().title.clone())
        .collect();
    assert_eq!(titles, vec!["通知2".to_string(), "通知3".to_string()]);
    assert_eq!(dedup.len(), 3);

    // Everything is marked now, so a second run fetches nothing
    let again = crawler.run(&format!("{}/list", server.uri()), SOURCE).await;
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_batch_crawl_without_dedup_fetches_everything() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = Arc::new(test_config(&server, 3, 600));
    let crawler = BatchCrawler::new(Arc::new(executor(config, memory_sink())), None);
    let outcomes = crawler.run(&format!("{}/list", server.uri()), SOURCE).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success));
}

#[tokio::test]
async fn test_async_batch_with_queue_down_returns_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ul></ul>"))
        .expect(0)
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server, 3, 600));
    let renderer = HttpRenderer::new(&config.crawler).unwrap();
    let store = MemoryJobStore::new();
    store.set_available(false);

    let producer = JobProducer::new(Arc::new(PolicyEngine::new(config)), Arc::new(store.clone()));
    let monitor = JobMonitor::new(Arc::new(store.clone()), Duration::from_secs(1));

    let outcomes = batch_crawl_async(
        &producer,
        &monitor,
        &renderer,
        &format!("{}/list", server.uri()),
        SOURCE,
        Duration::from_secs(5),
    )
    .await;

    assert!(outcomes.is_empty());
    assert_eq!(store.job_count(), 0);
}

//! Single-target fetches against a mock site

use crate::common::{detail_html, executor, memory_sink, test_config, SOURCE};
use notice_harvest::CrawlTarget;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_detail_page_end_to_end() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/notice/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_html("关于放假的通知"))
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server, 3, 600));
    let sink = memory_sink();
    let executor = executor(config, sink.clone());

    let url = format!("{}/notice/1", server.uri());
    let outcome = executor.fetch(&CrawlTarget::new(&url, SOURCE)).await;

    assert!(outcome.success, "fetch failed: {:?}", outcome.error_message);
    assert_eq!(outcome.attempt_count, 1);
    let record = outcome.payload.expect("payload");
    assert_eq!(record.title, "关于放假的通知");
    assert_eq!(record.author, "办公室");
    assert_eq!(record.content, "<p>正文内容</p>");
    assert_eq!(record.attachments, vec![format!("{}/notice/files/a.pdf", server.uri())]);
    assert_eq!(
        record.publish_time.format("%Y-%m-%d %H:%M").to_string(),
        "2024-05-20 09:15"
    );

    let row = sink.get(&url).unwrap().expect("stored row");
    assert!(row.success);
    assert_eq!(row.title, "关于放假的通知");
    assert_eq!(row.source_type, SOURCE);
}

#[tokio::test]
async fn test_robots_disallow_blocks_fetch() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /private/").await;
    Mock::given(method("GET"))
        .and(path("/private/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("内部")))
        .expect(0)
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server, 3, 600));
    let executor = executor(config, memory_sink());

    let url = format!("{}/private/1", server.uri());
    let outcome = executor.fetch(&CrawlTarget::new(url, SOURCE)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 0);
    assert!(outcome.error_message.unwrap().contains("robots.txt"));
}

#[tokio::test]
async fn test_broken_robots_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notice/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("开放")))
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server, 3, 600));
    let executor = executor(config, memory_sink());

    let url = format!("{}/notice/2", server.uri());
    let outcome = executor.fetch(&CrawlTarget::new(url, SOURCE)).await;

    assert!(outcome.success);
}

#[tokio::test]
async fn test_server_errors_exhaust_fetch_retries() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/notice/3"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server, 3, 600));
    let sink = memory_sink();
    let executor = executor(config, sink.clone());

    let url = format!("{}/notice/3", server.uri());
    let outcome = executor.fetch(&CrawlTarget::new(&url, SOURCE)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 3);
    assert!(outcome.error_message.unwrap().contains("503"));

    let row = sink.get(&url).unwrap().expect("failure row");
    assert!(!row.success);
    assert!(row.error_message.unwrap().contains("503"));
}

#[tokio::test]
async fn test_disallowed_host_is_never_requested() {
    let server = MockServer::start().await;
    let config = Arc::new(test_config(&server, 3, 600));
    let executor = executor(config, memory_sink());

    // Same server, but reached through a host name outside the allow-list
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    let url = format!("http://localhost:{}/notice/1", port);
    let outcome = executor.fetch(&CrawlTarget::new(url, SOURCE)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

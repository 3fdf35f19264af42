use notice_harvest::config::{parse_config, Config};
use notice_harvest::crawler::{FetchExecutor, HttpRenderer};
use notice_harvest::storage::{ResultSink, SqliteSink};
use notice_harvest::time::RecordingSleeper;
use notice_harvest::PolicyEngine;
use std::sync::Arc;
use wiremock::MockServer;

pub const SOURCE: &str = "测试站";

/// Builds a configuration whose only source allows the mock server's host
pub fn test_config(server: &MockServer, max_task_retries: u32, job_timeout_secs: u64) -> Config {
    let host = url::Url::parse(&server.uri())
        .expect("mock server URI")
        .host_str()
        .expect("mock server host")
        .to_string();

    parse_config(&format!(
        r#"
[crawler]
user-agent = "NoticeHarvestTest/1.0"
max-retries = 2
retry-pause-secs = 1
navigation-timeout-secs = 10

[delay]
normal-range = [0.0, 0.1]
peak-range = [0.0, 0.1]
min-delay = 0.0
max-delay = 0.1

[dedup]
redis-url = "redis://127.0.0.1:1/0"

[queue]
redis-url = "redis://127.0.0.1:1/1"
max-task-retries = {max_task_retries}
task-retry-interval-secs = 60
job-timeout-secs = {job_timeout_secs}

[output]
database-path = ":memory:"

[[source]]
name = "{SOURCE}"
allowed-domains = ["{host}"]
time-formats = ["%Y-%m-%d %H:%M"]

[source.selectors.list]
item-links = "a.item"
next-page = "a.next"

[source.selectors.detail]
title = "h1"
publish-time = ".time"
author = ".author"
content = ".content"
attachments = "a.file"
"#
    ))
    .expect("test config parses")
}

/// An executor that records delays instead of sleeping
pub fn executor(config: Arc<Config>, sink: Arc<dyn ResultSink>) -> FetchExecutor {
    let renderer = HttpRenderer::new(&config.crawler).expect("renderer");
    FetchExecutor::new(Arc::new(PolicyEngine::new(config)), Arc::new(renderer), sink)
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .with_rng_seed(7)
}

pub fn memory_sink() -> Arc<SqliteSink> {
    Arc::new(SqliteSink::new_in_memory().expect("in-memory sink"))
}

pub fn detail_html(title: &str) -> String {
    format!(
        r#"<html><head><title>站点</title></head><body>
            <h1>{title}</h1>
            <span class="time">2024-05-20 09:15</span>
            <span class="author">办公室</span>
            <div class="content"><p>正文内容</p></div>
            <a class="file" href="files/a.pdf">附件</a>
        </body></html>"#
    )
}

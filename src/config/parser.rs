use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use notice_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Sources: {}", config.sources.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(sha256_hex(content.as_bytes()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Hashes an in-memory configuration through its JSON snapshot form
///
/// Two processes holding equal configurations produce the same hash, which
/// lets a worker confirm the snapshot it received matches the producer's.
pub fn hash_config(config: &Config) -> Result<String, ConfigError> {
    let snapshot = config_snapshot(config)?;
    Ok(sha256_hex(snapshot.as_bytes()))
}

/// Serializes a configuration into the JSON snapshot stored with each job
pub fn config_snapshot(config: &Config) -> Result<String, ConfigError> {
    Ok(serde_json::to_string(config)?)
}

/// Rebuilds and re-validates a configuration from a job snapshot
pub fn config_from_snapshot(snapshot: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(snapshot)?;
    validate(&config)?;
    Ok(config)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_CONFIG: &str = r##"
[crawler]
user-agent = "NoticeHarvest/1.0"
max-retries = 2
retry-pause-secs = 2

[delay]
normal-range = [1.0, 3.0]
peak-range = [5.0, 8.0]
min-delay = 1.0
max-delay = 10.0
slow-threshold = 3.0
fast-threshold = 1.0
increase-step = 1.0
decrease-step = 0.5
jitter = 0.1

[[delay.peak-hours]]
start = "09:00"
end = "11:30"

[[delay.peak-hours]]
start = "14:00"
end = "17:00"

[dedup]
redis-url = "redis://127.0.0.1:6379/0"
key-prefix = "crawled_urls:"
url-expire-days = 7

[queue]
redis-url = "redis://127.0.0.1:6379/1"
queue-name = "crawl_tasks"
max-task-retries = 3
task-retry-interval-secs = 60
job-timeout-secs = 600
poll-interval-ms = 1000
monitor-interval-secs = 5
monitor-timeout-secs = 600

[output]
database-path = "./harvest.db"

[[source]]
name = "校园官网"
allowed-domains = ["file:///srv/notices/"]
time-formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"]
strip-markup = true

[source.selectors.list]
item-links = "a.notice-item, a.notice-link"
next-page = ".pagination .next"

[source.selectors.detail]
title = "h1.notice-title"
publish-time = ".publish-time"
author = ".author"
content = ".notice-content"
attachments = "a[href$='.pdf'], a[href$='.doc'], a[href$='.docx']"

[[source]]
name = "微信公众号"
allowed-domains = ["mp.weixin.qq.com"]
time-formats = ["%Y-%m-%d %H:%M:%S", "%Y年%m月%d日"]
content-cleanup = ["关注我们", "长按识别二维码", "点击上方蓝字"]
relative-time = true

[source.cookies]
wxuin = "uin"

[source.selectors.list]
item-links = "a.weui-msg-card"

[source.selectors.detail]
title = "#activity-name"
publish-time = "#publish-time"
author = "#js_name"
content = "#js_content"
attachments = "a[data-doc]"
attachment-attr = "data-doc"
attachment-prefix = "https://mp.weixin.qq.com/s/"
"##;

    pub(crate) fn sample_config() -> Config {
        parse_config(SAMPLE_CONFIG).unwrap()
    }

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(SAMPLE_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.max_retries, 2);
        assert_eq!(config.delay.peak_hours.len(), 2);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.dedup.ttl_seconds(), 7 * 86400);

        let wechat = config.source("微信公众号").unwrap();
        assert!(wechat.relative_time);
        assert_eq!(wechat.selectors.detail.attachment_attr, "data-doc");
        assert_eq!(wechat.cookies.get("wxuin").map(String::as_str), Some("uin"));

        let campus = config.source("校园官网").unwrap();
        assert_eq!(campus.selectors.detail.attachment_attr, "href");
        assert!(campus.selectors.detail.attachment_prefix.is_none());
    }

    #[test]
    fn test_defaults_for_omitted_sections() {
        let content = r#"
[crawler]
user-agent = "NoticeHarvest/1.0"

[output]
database-path = "./harvest.db"
"#;
        let config = parse_config(content).unwrap();
        assert_eq!(config.crawler.max_retries, 2);
        assert_eq!(config.crawler.navigation_timeout_secs, 30);
        assert_eq!(config.queue.queue_name, "crawl_tasks");
        assert_eq!(config.queue.job_timeout_secs, 600);
        assert_eq!(config.delay.max_delay, 10.0);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let content = r#"
[crawler]
user-agent = "NoticeHarvest/1.0"

[queue]
max-task-retries = 0

[output]
database-path = "./harvest.db"
"#;
        let config = parse_config(content).unwrap();
        assert_eq!(config.queue.max_task_retries, 0);
        assert_eq!(config.queue.task_retry_interval_secs, 60);
        assert_eq!(config.queue.redis_url, "redis://127.0.0.1:6379/1");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_snapshot_restores_equal_config() {
        let config = sample_config();
        let snapshot = config_snapshot(&config).unwrap();
        let restored = config_from_snapshot(&snapshot).unwrap();

        assert_eq!(restored.sources.len(), config.sources.len());
        assert_eq!(restored.delay.peak_hours, config.delay.peak_hours);
        assert_eq!(hash_config(&restored).unwrap(), hash_config(&config).unwrap());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}

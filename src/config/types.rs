use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for Notice-Harvest
///
/// Loaded once at startup and never mutated afterwards. It is also the
/// metadata snapshot handed to queued jobs, hence `Serialize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceProfile>,
}

impl Config {
    /// Looks up the policy profile for a source type
    pub fn source(&self, name: &str) -> Option<&SourceProfile> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Fetch behaviour configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Fetch-level retries after the first attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between fetch attempts (seconds)
    #[serde(rename = "retry-pause-secs", default = "default_retry_pause")]
    pub retry_pause_secs: u64,

    /// Page navigation timeout (seconds)
    #[serde(rename = "navigation-timeout-secs", default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Timeout for the robots.txt lookup (seconds)
    #[serde(rename = "robots-timeout-secs", default = "default_robots_timeout")]
    pub robots_timeout_secs: u64,

    /// Budget for locating fields on a loaded page (seconds)
    #[serde(rename = "element-timeout-secs", default = "default_element_timeout")]
    pub element_timeout_secs: u64,
}

/// Adaptive delay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Initial delay range outside peak hours (seconds)
    #[serde(rename = "normal-range")]
    pub normal_range: (f64, f64),

    /// Initial delay range during peak hours (seconds)
    #[serde(rename = "peak-range")]
    pub peak_range: (f64, f64),

    #[serde(rename = "min-delay")]
    pub min_delay: f64,

    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    /// Responses slower than this grow the delay (seconds)
    #[serde(rename = "slow-threshold")]
    pub slow_threshold: f64,

    /// Responses faster than this shrink the delay (seconds)
    #[serde(rename = "fast-threshold")]
    pub fast_threshold: f64,

    #[serde(rename = "increase-step")]
    pub increase_step: f64,

    #[serde(rename = "decrease-step")]
    pub decrease_step: f64,

    /// Relative jitter applied around the adjusted delay
    pub jitter: f64,

    #[serde(rename = "peak-hours", default)]
    pub peak_hours: Vec<PeakWindow>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            normal_range: (1.0, 3.0),
            peak_range: (5.0, 8.0),
            min_delay: 1.0,
            max_delay: 10.0,
            slow_threshold: 3.0,
            fast_threshold: 1.0,
            increase_step: 1.0,
            decrease_step: 0.5,
            jitter: 0.1,
            peak_hours: vec![
                PeakWindow {
                    start: "09:00".to_string(),
                    end: "11:30".to_string(),
                },
                PeakWindow {
                    start: "14:00".to_string(),
                    end: "17:00".to_string(),
                },
            ],
        }
    }
}

/// A wall-clock window in `HH:MM` form, both ends inclusive
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PeakWindow {
    pub start: String,
    pub end: String,
}

/// Dedup cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    #[serde(rename = "redis-url")]
    pub redis_url: String,

    #[serde(rename = "key-prefix")]
    pub key_prefix: String,

    /// Retention window for dedup entries
    #[serde(rename = "url-expire-days")]
    pub url_expire_days: u64,
}

impl DedupConfig {
    /// TTL of a dedup entry in seconds
    pub fn ttl_seconds(&self) -> u64 {
        self.url_expire_days * 24 * 3600
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "crawled_urls:".to_string(),
            url_expire_days: 7,
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(rename = "redis-url")]
    pub redis_url: String,

    #[serde(rename = "queue-name")]
    pub queue_name: String,

    /// Queue-level retries across job attempts
    #[serde(rename = "max-task-retries")]
    pub max_task_retries: u32,

    #[serde(rename = "task-retry-interval-secs")]
    pub task_retry_interval_secs: u64,

    /// Per-job execution budget, enforced inside the job process
    #[serde(rename = "job-timeout-secs")]
    pub job_timeout_secs: u64,

    /// Idle sleep of the consumer loop
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "monitor-interval-secs")]
    pub monitor_interval_secs: u64,

    #[serde(rename = "monitor-timeout-secs")]
    pub monitor_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/1".to_string(),
            queue_name: "crawl_tasks".to_string(),
            max_task_retries: 3,
            task_retry_interval_secs: 60,
            job_timeout_secs: 600,
            poll_interval_ms: 1000,
            monitor_interval_secs: 5,
            monitor_timeout_secs: 600,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Per-source-type policy profile
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceProfile {
    /// Source type name, the key targets refer to
    pub name: String,

    /// Domains (optionally `*.`-prefixed) or, for local files, path prefixes
    #[serde(rename = "allowed-domains")]
    pub allowed_domains: Vec<String>,

    /// chrono format strings tried in order when parsing publish times
    #[serde(rename = "time-formats", default)]
    pub time_formats: Vec<String>,

    /// Literal strings removed from extracted content
    #[serde(rename = "content-cleanup", default)]
    pub content_cleanup: Vec<String>,

    /// Accept relative publish times such as "3小时前" / "2天前"
    #[serde(rename = "relative-time", default)]
    pub relative_time: bool,

    /// Drop every tag except p, a and br from extracted content
    #[serde(rename = "strip-markup", default)]
    pub strip_markup: bool,

    /// Cookies sent with every request for this source
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    pub selectors: SelectorMap,
}

/// Selectors for list and detail pages
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorMap {
    pub list: ListSelectors,
    pub detail: DetailSelectors,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListSelectors {
    #[serde(rename = "item-links")]
    pub item_links: String,

    #[serde(rename = "next-page", default)]
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetailSelectors {
    pub title: String,

    #[serde(rename = "publish-time")]
    pub publish_time: String,

    pub author: String,

    pub content: String,

    pub attachments: String,

    /// Attribute holding the attachment link
    #[serde(rename = "attachment-attr", default = "default_attachment_attr")]
    pub attachment_attr: String,

    /// Base that attachment attribute values are appended to; when absent
    /// values are resolved against the page URL
    #[serde(rename = "attachment-prefix", default)]
    pub attachment_prefix: Option<String>,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_pause() -> u64 {
    2
}

fn default_navigation_timeout() -> u64 {
    30
}

fn default_robots_timeout() -> u64 {
    10
}

fn default_element_timeout() -> u64 {
    10
}

fn default_attachment_attr() -> String {
    "href".to_string()
}

use crate::config::types::{Config, CrawlerConfig, DelayConfig, QueueConfig, SourceProfile};
use crate::ConfigError;
use chrono::NaiveTime;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_delay_config(&config.delay)?;
    validate_redis_url(&config.dedup.redis_url, "dedup.redis-url")?;
    if config.dedup.url_expire_days == 0 {
        return Err(ConfigError::Validation(
            "url-expire-days must be >= 1".to_string(),
        ));
    }
    validate_queue_config(&config.queue)?;
    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    validate_sources(&config.sources)?;
    Ok(())
}

/// Parses an `HH:MM` wall-clock value
pub fn parse_clock(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        ConfigError::Validation(format!("Invalid time of day '{}': {}", value, e))
    })
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.navigation_timeout_secs == 0
        || config.robots_timeout_secs == 0
        || config.element_timeout_secs == 0
    {
        return Err(ConfigError::Validation(
            "navigation, robots and element timeouts must be >= 1s".to_string(),
        ));
    }

    Ok(())
}

fn validate_delay_config(config: &DelayConfig) -> Result<(), ConfigError> {
    for (label, (low, high)) in [
        ("normal-range", config.normal_range),
        ("peak-range", config.peak_range),
    ] {
        if low < 0.0 || low > high {
            return Err(ConfigError::Validation(format!(
                "{} must satisfy 0 <= low <= high, got [{}, {}]",
                label, low, high
            )));
        }
    }

    if config.min_delay < 0.0 || config.min_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "min-delay ({}) must be between 0 and max-delay ({})",
            config.min_delay, config.max_delay
        )));
    }

    if config.fast_threshold > config.slow_threshold {
        return Err(ConfigError::Validation(format!(
            "fast-threshold ({}) cannot exceed slow-threshold ({})",
            config.fast_threshold, config.slow_threshold
        )));
    }

    if config.increase_step < 0.0 || config.decrease_step < 0.0 {
        return Err(ConfigError::Validation(
            "delay steps cannot be negative".to_string(),
        ));
    }

    if !(0.0..1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be in [0, 1), got {}",
            config.jitter
        )));
    }

    for window in &config.peak_hours {
        let start = parse_clock(&window.start)?;
        let end = parse_clock(&window.end)?;
        if start > end {
            return Err(ConfigError::Validation(format!(
                "peak window {}-{} ends before it starts",
                window.start, window.end
            )));
        }
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    validate_redis_url(&config.redis_url, "queue.redis-url")?;

    if config.queue_name.is_empty() {
        return Err(ConfigError::Validation(
            "queue-name cannot be empty".to_string(),
        ));
    }

    if config.job_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "job-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.monitor_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "monitor-interval-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_redis_url(value: &str, field: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "redis" && url.scheme() != "rediss" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use the redis:// or rediss:// scheme",
            field
        )));
    }

    Ok(())
}

fn validate_sources(sources: &[SourceProfile]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for source in sources {
        if source.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source '{}'",
                source.name
            )));
        }

        if source.allowed_domains.is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must allow at least one domain or path",
                source.name
            )));
        }

        for entry in &source.allowed_domains {
            validate_allow_entry(entry)?;
        }
    }

    Ok(())
}

/// Validates an allow-list entry: a local path prefix or a domain pattern
fn validate_allow_entry(entry: &str) -> Result<(), ConfigError> {
    if let Some(path) = entry.strip_prefix("file://") {
        if path.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "file:// prefix must name a path".to_string(),
            ));
        }
        return Ok(());
    }

    validate_domain_pattern(entry)
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        validate_domain_string(domain)
    } else {
        validate_domain_string(pattern)
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

//! Notice-Harvest: a polite notice and article harvester
//!
//! This crate fetches detail pages from configured sources on a politeness
//! schedule (allow-lists, robots.txt, adaptive delay) and drives each fetch
//! either in-process or through a Redis-backed job queue whose workers run
//! every job in its own OS process.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod policy;
pub mod queue;
pub mod robots;
pub mod storage;
pub mod time;
pub mod url;

use thiserror::Error;

/// Main error type for Notice-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy rejection: {0}")]
    Policy(#[from] PolicyRejection),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Dedup cache error: {0}")]
    Dedup(#[from] DedupError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// Reasons a target is refused before any fetch or job exists
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyRejection {
    #[error("Unknown source type: {0}")]
    UnknownSource(String),

    #[error("URL {url} is outside the allow-list of {source_type}")]
    DisallowedDomain { url: String, source_type: String },

    #[error("Malformed URL: {0}")]
    InvalidUrl(String),
}

/// Transient failures of a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {seconds}s loading {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Dedup cache errors (always degraded, never fatal)
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Job queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to decode job {id}: {message}")]
    Decode { id: String, message: String },

    #[error("Failed to launch isolated job process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Configuration snapshot error: {0}")]
    Snapshot(#[from] ConfigError),
}

/// Result type alias for Notice-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlTarget, FetchExecutor, FetchOutcome};
pub use policy::{DelayState, PolicyEngine};
pub use queue::{JobHandle, JobMonitor, JobProducer, JobStatus, Worker};

//! Configuration module for Notice-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and turning a loaded configuration into the snapshot carried by queued jobs.
//!
//! # Example
//!
//! ```no_run
//! use notice_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Fetch retries: {}", config.crawler.max_retries);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, DedupConfig, DelayConfig, DetailSelectors, ListSelectors,
    OutputConfig, PeakWindow, QueueConfig, SelectorMap, SourceProfile,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, config_from_snapshot, config_snapshot, hash_config, load_config,
    load_config_with_hash, parse_config,
};
pub use validation::{parse_clock, validate};

#[cfg(test)]
pub(crate) use parser::tests::sample_config;

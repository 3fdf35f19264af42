//! URL deduplication cache
//!
//! A dedup entry means "attempted recently": key `<prefix><url>`, sentinel
//! value, expiring after the configured retention window. The cache is
//! advisory; an unavailable store degrades to no deduplication.

mod memory;
mod redis_cache;

pub use memory::MemoryDedupCache;
pub use redis_cache::RedisDedupCache;

use crate::config::DedupConfig;
use crate::DedupError;
use async_trait::async_trait;
use std::sync::Arc;

/// Contract of the external key/value store used for deduplication
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// True if `url` has a live dedup entry
    async fn exists(&self, url: &str) -> Result<bool, DedupError>;

    /// Marks `url` processed for `ttl_seconds`; re-marking refreshes the TTL
    async fn mark_processed(&self, url: &str, ttl_seconds: u64) -> Result<(), DedupError>;
}

/// Connects the Redis dedup cache, or returns None after logging a warning
///
/// Callers treat None as "no deduplication" and carry on.
pub async fn connect_dedup(config: &DedupConfig) -> Option<Arc<dyn DedupCache>> {
    match RedisDedupCache::connect(config).await {
        Ok(cache) => {
            tracing::debug!(prefix = %config.key_prefix, "Dedup cache connected");
            Some(Arc::new(cache))
        }
        Err(e) => {
            tracing::warn!("Dedup store unavailable ({}), continuing without deduplication", e);
            None
        }
    }
}

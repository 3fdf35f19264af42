use crate::dedup::DedupCache;
use crate::time::{Clock, SystemClock};
use crate::DedupError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process dedup cache with per-key expiry on an injectable clock
pub struct MemoryDedupCache {
    entries: Mutex<HashMap<String, DateTime<Local>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryDedupCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries, live or expired
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expiry instant of `url`'s entry, if any
    pub fn expires_at(&self, url: &str) -> Option<DateTime<Local>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .copied()
    }
}

impl Default for MemoryDedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupCache for MemoryDedupCache {
    async fn exists(&self, url: &str) -> Result<bool, DedupError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .is_some_and(|expiry| *expiry > now))
    }

    async fn mark_processed(&self, url: &str, ttl_seconds: u64) -> Result<(), DedupError> {
        let expiry = self.clock.now() + Duration::seconds(ttl_seconds as i64);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), expiry);
        Ok(())
    }
}

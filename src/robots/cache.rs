//! Robots.txt caching implementation
//!
//! Entries expire after 24 hours so rule changes are picked up daily.

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Cached robots.txt data for one origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Per-origin robots.txt cache shared by every check in a process
#[derive(Debug, Default)]
pub struct RobotsCache {
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fresh entry for `origin`, dropping it if stale
    pub fn get(&self, origin: &str) -> Option<ParsedRobots> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(origin) {
            Some(cached) if !cached.is_stale() => Some(cached.content.clone()),
            Some(_) => {
                entries.remove(origin);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, origin: &str, robots: ParsedRobots) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(origin.to_string(), CachedRobots::new(robots));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

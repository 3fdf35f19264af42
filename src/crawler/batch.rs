//! Synchronous batch crawl
//!
//! This module drives a whole list page in-process:
//! - Discovering detail URLs (following next-page links)
//! - Skipping URLs with a live dedup entry
//! - Fetching the rest one after another
//! - Marking successful URLs in the dedup cache

use crate::crawler::parser::{extract_item_links, extract_next_page};
use crate::crawler::{CrawlTarget, FetchExecutor, FetchOutcome, PageRenderer};
use crate::dedup::DedupCache;
use crate::policy::PolicyEngine;
use std::collections::HashSet;
use std::sync::Arc;

/// Upper bound on list pages followed through `next-page` links
pub const MAX_LIST_PAGES: usize = 20;

/// Discovers admitted detail URLs reachable from a list page
///
/// Loads the list page, reads `item-links`, follows `next-page` while it
/// stays admitted, and keeps only URLs the policy admits, in document
/// order without duplicates. Load or selector failures end discovery with
/// whatever was found so far.
///
/// # Arguments
///
/// * `policy` - Admission rules
/// * `renderer` - Page loader
/// * `list_url` - The first list page
/// * `source` - Source type name
pub async fn discover_detail_urls(
    policy: &PolicyEngine,
    renderer: &dyn PageRenderer,
    list_url: &str,
    source: &str,
) -> Vec<String> {
    let Some(profile) = policy.config().source(source) else {
        tracing::error!(url = %list_url, source = %source, "Unknown source type");
        return Vec::new();
    };

    let mut next = match policy.admit(list_url, source) {
        Ok(url) => Some(url),
        Err(_) => return Vec::new(),
    };

    let mut visited = HashSet::new();
    let mut found: Vec<String> = Vec::new();

    while let Some(page_url) = next.take() {
        if visited.len() >= MAX_LIST_PAGES || !visited.insert(page_url.to_string()) {
            break;
        }

        let page = match renderer.load(&page_url, Some(profile)).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(url = %page_url, "Failed to load list page: {}", e);
                break;
            }
        };

        match extract_item_links(&page.html, &page_url, &profile.selectors.list.item_links) {
            Ok(links) => {
                for link in links {
                    if policy.is_allowed(&link, source) && !found.contains(&link) {
                        found.push(link);
                    }
                }
            }
            Err(e) => {
                tracing::error!(url = %page_url, "Failed to read list items: {}", e);
                break;
            }
        }

        if let Some(selector) = &profile.selectors.list.next_page {
            next = extract_next_page(&page.html, &page_url, selector)
                .ok()
                .flatten()
                .and_then(|href| policy.admit(&href, source).ok());
        }
    }

    tracing::info!(url = %list_url, count = found.len(), "Discovered detail pages");
    found
}

/// In-process crawl of one list page
pub struct BatchCrawler {
    executor: Arc<FetchExecutor>,
    dedup: Option<Arc<dyn DedupCache>>,
}

impl BatchCrawler {
    /// Creates a batch crawler; `dedup = None` disables deduplication
    pub fn new(executor: Arc<FetchExecutor>, dedup: Option<Arc<dyn DedupCache>>) -> Self {
        Self { executor, dedup }
    }

    /// Crawls every detail page reachable from `list_url`
    ///
    /// # Returns
    ///
    /// Successful outcomes only; failures are already in the result sink
    pub async fn run(&self, list_url: &str, source: &str) -> Vec<FetchOutcome> {
        let urls = discover_detail_urls(
            self.executor.policy(),
            self.executor.renderer().as_ref(),
            list_url,
            source,
        )
        .await;

        if urls.is_empty() {
            tracing::warn!(url = %list_url, "No detail pages found");
            return Vec::new();
        }

        let ttl = self.executor.config().dedup.ttl_seconds();
        let mut results = Vec::new();

        for url in urls {
            if self.already_processed(&url).await {
                tracing::info!(url = %url, "Skipping recently crawled URL");
                continue;
            }

            let outcome = self.executor.fetch(&CrawlTarget::new(&url, source)).await;
            if !outcome.success {
                continue;
            }

            if let Some(dedup) = &self.dedup {
                if let Err(e) = dedup.mark_processed(&url, ttl).await {
                    tracing::warn!(url = %url, "Failed to mark URL processed: {}", e);
                }
            }
            results.push(outcome);
        }

        tracing::info!(url = %list_url, fetched = results.len(), "Batch crawl finished");
        results
    }

    async fn already_processed(&self, url: &str) -> bool {
        let Some(dedup) = &self.dedup else {
            return false;
        };

        match dedup.exists(url).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(url = %url, "Dedup lookup failed ({}), fetching anyway", e);
                false
            }
        }
    }
}

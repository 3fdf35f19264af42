//! Crawler module for page fetching and processing
//!
//! This module contains the fetch path, including:
//! - Page loading (HTTP and local files)
//! - Field extraction and record cleanup
//! - The bounded-retry fetch executor
//! - The in-process batch crawl

mod batch;
mod executor;
mod fetcher;
mod parser;
mod record;

pub use batch::{discover_detail_urls, BatchCrawler, MAX_LIST_PAGES};
pub use executor::FetchExecutor;
pub use fetcher::{build_http_client, cookie_header, HttpRenderer, PageRenderer, RenderedPage};
pub use parser::{extract_item_links, extract_next_page, ExtractedFields, FieldExtractor, SelectorExtractor};
pub use record::{
    build_record, clean_content, parse_publish_time, ExtractedRecord, NO_CONTENT, TIME_FORMAT,
    UNKNOWN_AUTHOR, UNTITLED,
};

use serde::{Deserialize, Serialize};

/// What to fetch and which source profile applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub url: String,
    pub source: String,
}

impl CrawlTarget {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// Result of one attempt sequence for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub target: CrawlTarget,
    pub success: bool,
    pub payload: Option<ExtractedRecord>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
}

impl FetchOutcome {
    pub fn succeeded(target: CrawlTarget, record: ExtractedRecord, attempt_count: u32) -> Self {
        Self {
            target,
            success: true,
            payload: Some(record),
            error_message: None,
            attempt_count,
        }
    }

    pub fn failed(target: CrawlTarget, error: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            target,
            success: false,
            payload: None,
            error_message: Some(error.into()),
            attempt_count,
        }
    }
}

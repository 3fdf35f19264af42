//! Page loading
//!
//! This module handles every page load the crawler performs:
//! - Building the HTTP client with the configured user agent and timeout
//! - Per-source cookie headers
//! - Serving `file://` targets from the local filesystem
//! - Plain-text downloads (robots.txt) under their own timeout

use crate::config::{CrawlerConfig, SourceProfile};
use crate::url::is_local_file;
use crate::FetchError;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use std::time::{Duration, Instant};
use url::Url;

/// A loaded page, ready for field extraction
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after redirects
    pub url: Url,

    /// Page markup
    pub html: String,

    /// Wall-clock time the load took
    pub elapsed: Duration,
}

/// Loads pages on behalf of the policy engine and the fetch executor
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Loads a page, applying the source's cookies when given
    async fn load(
        &self,
        url: &Url,
        source: Option<&SourceProfile>,
    ) -> Result<RenderedPage, FetchError>;

    /// Downloads a text resource, failing on any non-success status
    async fn fetch_text(&self, url: &Url, timeout: Duration) -> Result<String, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.navigation_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `reqwest`-backed renderer
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
    navigation_timeout: u64,
}

impl HttpRenderer {
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let client = build_http_client(config).map_err(|e| FetchError::Navigation {
            url: String::new(),
            message: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            navigation_timeout: config.navigation_timeout_secs,
        })
    }

    async fn get_text(
        &self,
        url: &Url,
        cookie: Option<String>,
        timeout: Duration,
    ) -> Result<(Url, String), FetchError> {
        let mut request = self.client.get(url.clone()).timeout(timeout);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_error(url, e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_error(url, e, timeout))?;

        Ok((final_url, body))
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn load(
        &self,
        url: &Url,
        source: Option<&SourceProfile>,
    ) -> Result<RenderedPage, FetchError> {
        let started = Instant::now();

        if is_local_file(url) {
            let html = read_local(url).await?;
            return Ok(RenderedPage {
                url: url.clone(),
                html,
                elapsed: started.elapsed(),
            });
        }

        let cookie = source.and_then(cookie_header);
        let (final_url, html) = self
            .get_text(url, cookie, Duration::from_secs(self.navigation_timeout))
            .await?;

        tracing::debug!(url = %url, bytes = html.len(), "Page loaded");

        Ok(RenderedPage {
            url: final_url,
            html,
            elapsed: started.elapsed(),
        })
    }

    async fn fetch_text(&self, url: &Url, timeout: Duration) -> Result<String, FetchError> {
        if is_local_file(url) {
            return read_local(url).await;
        }

        self.get_text(url, None, timeout).await.map(|(_, body)| body)
    }
}

/// Formats a source's cookies as a single `Cookie` header value
pub fn cookie_header(source: &SourceProfile) -> Option<String> {
    if source.cookies.is_empty() {
        return None;
    }

    Some(
        source
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

async fn read_local(url: &Url) -> Result<String, FetchError> {
    let path = url.to_file_path().map_err(|_| FetchError::Navigation {
        url: url.to_string(),
        message: "not a local file path".to_string(),
    })?;

    let bytes = tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
        path: path.display().to_string(),
        source,
    })?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn classify_error(url: &Url, error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }
    } else if error.is_connect() {
        FetchError::Navigation {
            url: url.to_string(),
            message: "connection refused".to_string(),
        }
    } else {
        FetchError::Navigation {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

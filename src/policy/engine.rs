use crate::config::Config;
use crate::crawler::PageRenderer;
use crate::policy::delay::{self, DelayState};
use crate::robots::{ParsedRobots, RobotsCache};
use crate::url::{is_local_file, matches_allow_entry, robots_url};
use crate::PolicyRejection;
use chrono::{DateTime, Local};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Decides whether a URL may be fetched and how long to wait before it
///
/// Holds the immutable configuration and a per-origin robots.txt cache.
/// Admission is a pure function of `(url, source, config)`.
#[derive(Debug)]
pub struct PolicyEngine {
    config: Arc<Config>,
    robots: RobotsCache,
}

impl PolicyEngine {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            robots: RobotsCache::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the configuration this engine enforces
    pub fn config_arc(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Returns true iff `url` matches the allow-list of `source`
    ///
    /// Unknown source types and malformed URLs are always rejected.
    pub fn is_allowed(&self, url: &str, source: &str) -> bool {
        self.admit(url, source).is_ok()
    }

    /// Admission check that reports why a target was refused
    ///
    /// # Returns
    ///
    /// * `Ok(Url)` - The parsed, admitted URL
    /// * `Err(PolicyRejection)` - Unknown source, bad URL, or not allow-listed
    pub fn admit(&self, url: &str, source: &str) -> Result<Url, PolicyRejection> {
        let result = self.evaluate(url, source);
        if let Err(rejection) = &result {
            tracing::info!(url = %url, source = %source, "Target rejected: {}", rejection);
        }
        result
    }

    fn evaluate(&self, url: &str, source: &str) -> Result<Url, PolicyRejection> {
        let profile = self
            .config
            .source(source)
            .ok_or_else(|| PolicyRejection::UnknownSource(source.to_string()))?;

        let parsed = Url::parse(url).map_err(|_| PolicyRejection::InvalidUrl(url.to_string()))?;

        if profile
            .allowed_domains
            .iter()
            .any(|entry| matches_allow_entry(entry, &parsed))
        {
            Ok(parsed)
        } else {
            Err(PolicyRejection::DisallowedDomain {
                url: url.to_string(),
                source_type: source.to_string(),
            })
        }
    }

    /// Consults the origin's robots.txt for the configured user agent
    ///
    /// Fails open: local files, unreachable origins, timeouts and non-success
    /// statuses all permit the fetch. Only an explicit disallow refuses it.
    pub async fn check_robots(&self, url: &Url, renderer: &dyn PageRenderer) -> bool {
        if is_local_file(url) {
            tracing::debug!(url = %url, "Local file, skipping robots.txt");
            return true;
        }

        let Some(robots_location) = robots_url(url) else {
            return true;
        };

        let origin = url.origin().ascii_serialization();
        let robots = match self.robots.get(&origin) {
            Some(robots) => robots,
            None => {
                let robots = self.download_robots(&robots_location, renderer).await;
                if let Some(parsed) = &robots {
                    self.robots.insert(&origin, parsed.clone());
                }
                robots.unwrap_or_else(ParsedRobots::allow_all)
            }
        };

        let allowed = robots.is_allowed(url.as_str(), &self.config.crawler.user_agent);
        if !allowed {
            tracing::info!(url = %url, "robots.txt disallows this path");
        }
        allowed
    }

    async fn download_robots(
        &self,
        location: &Url,
        renderer: &dyn PageRenderer,
    ) -> Option<ParsedRobots> {
        let timeout = Duration::from_secs(self.config.crawler.robots_timeout_secs);

        match tokio::time::timeout(timeout, renderer.fetch_text(location, timeout)).await {
            Ok(Ok(content)) => Some(ParsedRobots::from_content(&content)),
            Ok(Err(e)) => {
                tracing::warn!(url = %location, "robots.txt unavailable ({}), proceeding carefully", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    url = %location,
                    "robots.txt timed out after {}s, proceeding carefully",
                    timeout.as_secs()
                );
                None
            }
        }
    }

    /// True iff `now` falls inside a configured peak window
    pub fn is_peak_hour(&self, now: DateTime<Local>) -> bool {
        delay::is_peak_hour(&self.config.delay, now.time())
    }

    /// Computes the delay (seconds) before the next fetch
    pub fn next_delay<R: Rng + ?Sized>(
        &self,
        state: &DelayState,
        now: DateTime<Local>,
        rng: &mut R,
    ) -> f64 {
        let peak = self.is_peak_hour(now);
        if peak && state.last_delay.is_none() {
            tracing::debug!("Peak hour, using the longer delay range");
        }
        delay::next_delay(&self.config.delay, state, peak, rng)
    }
}

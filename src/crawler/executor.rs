use crate::config::{Config, SourceProfile};
use crate::crawler::record::build_record;
use crate::crawler::{
    CrawlTarget, ExtractedRecord, FetchOutcome, FieldExtractor, HttpRenderer, PageRenderer,
    SelectorExtractor,
};
use crate::policy::{DelayState, PolicyEngine};
use crate::storage::{open_sink, ResultSink, SinkRecord};
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::FetchError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Runs the bounded attempt loop for one target
///
/// Every attempt waits the policy delay, loads the page, extracts fields and
/// writes the result through the sink. Failures never escape: `fetch`
/// always returns a [`FetchOutcome`].
pub struct FetchExecutor {
    policy: Arc<PolicyEngine>,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn FieldExtractor>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    rng: Mutex<StdRng>,
}

impl FetchExecutor {
    /// Creates an executor on the real clock with the selector extractor
    pub fn new(
        policy: Arc<PolicyEngine>,
        renderer: Arc<dyn PageRenderer>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            policy,
            renderer,
            extractor: Arc::new(SelectorExtractor),
            sink,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Builds the production executor: HTTP renderer and the SQLite sink
    /// named by `output.database-path`
    pub fn from_config(config: Arc<Config>) -> crate::Result<Self> {
        let renderer = HttpRenderer::new(&config.crawler)?;
        let sink = open_sink(Path::new(&config.output.database_path))?;
        Ok(Self::new(
            Arc::new(PolicyEngine::new(config)),
            Arc::new(renderer),
            Arc::new(sink),
        ))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Seeds the delay RNG so delays are reproducible
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn renderer(&self) -> &Arc<dyn PageRenderer> {
        &self.renderer
    }

    pub fn config(&self) -> &Config {
        self.policy.config()
    }

    /// Fetches one target
    ///
    /// # Flow
    ///
    /// 1. Policy admission; a rejected target yields a failed outcome with
    ///    zero attempts
    /// 2. robots.txt check (fails open)
    /// 3. Up to `max-retries + 1` attempts, each preceded by the adaptive
    ///    delay and followed, on failure, by the fixed retry pause
    ///
    /// # Returns
    ///
    /// The outcome of the attempt sequence, successful or not
    pub async fn fetch(&self, target: &CrawlTarget) -> FetchOutcome {
        let url = match self.policy.admit(&target.url, &target.source) {
            Ok(url) => url,
            Err(rejection) => return FetchOutcome::failed(target.clone(), rejection.to_string(), 0),
        };

        let Some(profile) = self.config().source(&target.source) else {
            return FetchOutcome::failed(
                target.clone(),
                format!("Unknown source type: {}", target.source),
                0,
            );
        };

        if !self.policy.check_robots(&url, self.renderer.as_ref()).await {
            return FetchOutcome::failed(target.clone(), "Disallowed by robots.txt".to_string(), 0);
        }

        let crawler = &self.config().crawler;
        let max_attempts = crawler.max_retries + 1;
        let retry_pause = Duration::from_secs(crawler.retry_pause_secs);

        let mut state = DelayState::new();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let delay = self.next_delay(&state);
            tracing::info!(url = %url, attempt, "Waiting {:.2}s before fetch", delay);
            self.sleeper.sleep(Duration::from_secs_f64(delay)).await;

            match self.attempt(&url, profile).await {
                Ok((record, elapsed)) => {
                    tracing::info!(
                        url = %url,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Fetched \"{}\"",
                        record.title
                    );
                    let row = SinkRecord::success(&record, self.clock.now().naive_local());
                    if !self.sink.save(&row) {
                        tracing::warn!(url = %url, "Fetched record could not be stored");
                    }
                    return FetchOutcome::succeeded(target.clone(), record, attempt);
                }
                Err(failure) => {
                    tracing::error!(
                        url = %url,
                        source = %target.source,
                        attempt,
                        "Fetch attempt {} failed: {}",
                        attempt,
                        failure.error
                    );
                    let response_time = failure
                        .elapsed
                        .map(|e| e.as_secs_f64())
                        .or(state.last_response_time);
                    state = state.advance(delay, response_time);

                    last_error = failure.error.to_string();
                    let row = SinkRecord::failure(
                        url.as_str(),
                        &target.source,
                        &last_error,
                        self.clock.now().naive_local(),
                    );
                    if !self.sink.save(&row) {
                        tracing::warn!(url = %url, "Failed attempt could not be recorded");
                    }

                    if attempt < max_attempts {
                        self.sleeper.sleep(retry_pause).await;
                    }
                }
            }
        }

        FetchOutcome::failed(target.clone(), last_error, max_attempts)
    }

    fn next_delay(&self, state: &DelayState) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.policy.next_delay(state, self.clock.now(), &mut *rng)
    }

    /// One load + extract, bounded by the navigation and element timeouts
    async fn attempt(
        &self,
        url: &Url,
        profile: &SourceProfile,
    ) -> Result<(ExtractedRecord, Duration), AttemptFailure> {
        let crawler = &self.config().crawler;
        let navigation_timeout = Duration::from_secs(crawler.navigation_timeout_secs);

        let page = match tokio::time::timeout(
            navigation_timeout,
            self.renderer.load(url, Some(profile)),
        )
        .await
        {
            Ok(Ok(page)) => page,
            Ok(Err(error)) => return Err(AttemptFailure::before_load(error)),
            Err(_) => {
                return Err(AttemptFailure::before_load(FetchError::Timeout {
                    url: url.to_string(),
                    seconds: crawler.navigation_timeout_secs,
                }))
            }
        };
        let elapsed = page.elapsed;

        let extractor = Arc::clone(&self.extractor);
        let selectors = profile.selectors.detail.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&page, &selectors));

        let fields = match tokio::time::timeout(
            Duration::from_secs(crawler.element_timeout_secs),
            extraction,
        )
        .await
        {
            Ok(Ok(Ok(fields))) => fields,
            Ok(Ok(Err(error))) => return Err(AttemptFailure::after_load(error, elapsed)),
            Ok(Err(join_error)) => {
                return Err(AttemptFailure::after_load(
                    FetchError::Navigation {
                        url: url.to_string(),
                        message: format!("extractor crashed: {}", join_error),
                    },
                    elapsed,
                ))
            }
            Err(_) => {
                return Err(AttemptFailure::after_load(
                    FetchError::Timeout {
                        url: url.to_string(),
                        seconds: crawler.element_timeout_secs,
                    },
                    elapsed,
                ))
            }
        };

        let record = build_record(
            url.as_str(),
            profile,
            fields,
            self.clock.now().naive_local(),
        );
        Ok((record, elapsed))
    }
}

struct AttemptFailure {
    error: FetchError,
    elapsed: Option<Duration>,
}

impl AttemptFailure {
    fn before_load(error: FetchError) -> Self {
        Self {
            error,
            elapsed: None,
        }
    }

    fn after_load(error: FetchError, elapsed: Duration) -> Self {
        Self {
            error,
            elapsed: Some(elapsed),
        }
    }
}

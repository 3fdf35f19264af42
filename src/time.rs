//! Clock and sleep seams
//!
//! Every intentional wait in the crate (politeness delay, retry pause, poll
//! interval, monitor sweep) goes through [`Sleeper`], and every wall-clock
//! read goes through [`Clock`], so tests can simulate elapsed time.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Async sleep
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The real local clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    pub fn set(&self, instant: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Records requested sleeps instead of waiting; optionally advances a
/// [`ManualClock`] by the requested amount
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
    clock: Option<ManualClock>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            sleeps: Arc::default(),
            clock: Some(clock),
        }
    }

    /// All sleeps requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_recording_sleeper_advances_clock() {
        let start = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let sleeper = RecordingSleeper::with_clock(clock.clone());

        sleeper.sleep(Duration::from_secs(90)).await;
        sleeper.sleep(Duration::from_millis(500)).await;

        assert_eq!(sleeper.sleeps().len(), 2);
        assert_eq!(sleeper.total(), Duration::from_millis(90_500));
        assert_eq!(
            clock.now() - start,
            chrono::Duration::milliseconds(90_500)
        );
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let later = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}

//! Adaptive politeness delay
//!
//! Additive-increase/additive-decrease on the previous delay, driven by the
//! last observed response time and bounded by `[min-delay, max-delay]`.

use crate::config::{parse_clock, DelayConfig};
use chrono::{NaiveTime, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Rolling delay state carried by the caller between fetches of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayState {
    /// Delay slept before the previous fetch (seconds)
    pub last_delay: Option<f64>,

    /// Response time of the previous fetch (seconds)
    pub last_response_time: Option<f64>,
}

impl DelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state after a fetch that waited `delay` seconds
    ///
    /// A `None` response time (the load failed before it could be measured)
    /// keeps the delay steady on the next computation.
    pub fn advance(self, delay: f64, response_time: Option<f64>) -> Self {
        Self {
            last_delay: Some(delay),
            last_response_time: response_time,
        }
    }
}

/// Checks whether `now` (truncated to HH:MM) lies inside a peak window
///
/// Both window ends are inclusive. Windows that fail to parse never match;
/// validation rejects them at load time.
pub fn is_peak_hour(config: &DelayConfig, now: NaiveTime) -> bool {
    let Some(minute) = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0) else {
        return false;
    };

    config.peak_hours.iter().any(|window| {
        match (parse_clock(&window.start), parse_clock(&window.end)) {
            (Ok(start), Ok(end)) => start <= minute && minute <= end,
            _ => false,
        }
    })
}

/// Computes the delay before the next fetch
///
/// # Arguments
///
/// * `config` - Delay bounds, thresholds and steps
/// * `state` - The caller's rolling delay state
/// * `peak` - Whether the current time is a peak hour
/// * `rng` - Randomness source for the initial draw and the jitter
///
/// # Returns
///
/// Seconds to wait, rounded to two decimals and always in
/// `[min_delay, max_delay]`
pub fn next_delay<R: Rng + ?Sized>(
    config: &DelayConfig,
    state: &DelayState,
    peak: bool,
    rng: &mut R,
) -> f64 {
    let (min, max) = (config.min_delay, config.max_delay);

    let Some(last) = state.last_delay else {
        let (low, high) = if peak {
            config.peak_range
        } else {
            config.normal_range
        };
        return round2(uniform(rng, low, high)).clamp(min, max);
    };

    let adjusted = adjust(config, last, state.last_response_time).clamp(min, max);
    let spread = adjusted * config.jitter;
    let jittered = uniform(rng, adjusted - spread, adjusted + spread);

    round2(jittered).clamp(min, max)
}

/// The unjittered adjustment of the previous delay
pub fn adjust(config: &DelayConfig, last_delay: f64, response_time: Option<f64>) -> f64 {
    match response_time {
        Some(t) if t > config.slow_threshold => last_delay + config.increase_step,
        Some(t) if t < config.fast_threshold => last_delay - config.decrease_step,
        _ => last_delay,
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.random_range(low..=high)
    } else {
        low
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//! Politeness policy
//!
//! This module decides, for every URL, whether it may be fetched at all
//! (allow-list, robots.txt) and how long to wait before fetching it
//! (time-of-day range plus response-time adaptation).

mod delay;
mod engine;

pub use delay::{adjust, is_peak_hour, next_delay, DelayState};
pub use engine::PolicyEngine;

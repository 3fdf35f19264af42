//! Robots.txt handling module
//!
//! This module provides parsing and per-origin caching of robots.txt files.
//! Fetching goes through the page renderer and lives in the policy engine,
//! which treats every failure as permission.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

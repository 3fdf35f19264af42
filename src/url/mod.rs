//! URL handling module for Notice-Harvest
//!
//! This module provides domain extraction, wildcard matching, and the
//! allow-list checks the policy engine builds on.

mod domain;
mod matcher;

// Re-export main functions
pub use domain::{extract_domain, is_local_file, robots_url};
pub use matcher::{matches_allow_entry, matches_wildcard};

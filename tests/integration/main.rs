//! Integration tests for Notice-Harvest
//!
//! These tests use wiremock to stand in for the crawled sites and the
//! in-memory job store and dedup cache to stand in for Redis.

mod batch_tests;
mod common;
mod fetch_tests;
mod queue_tests;

//! Integration tests for Forum-Ripple
//!
//! These tests use wiremock to stand in for the forum and its admin panel and
//! drive whole operations end-to-end against in-memory or temporary storage.

mod common;
mod config_tests;
mod crawl_tests;
mod export_tests;
mod fetcher_tests;

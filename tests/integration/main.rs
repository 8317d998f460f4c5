//! Integration tests for Gleaner
//!
//! These run the full stack (HTTP renderer, scheduler, JSON store) against
//! wiremock servers and temporary state directories.

mod crawl_tests;
mod store_tests;

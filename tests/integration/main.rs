//! Integration tests for Shelf-Crawl

mod crawl_tests;
mod queue_tests;
mod support;

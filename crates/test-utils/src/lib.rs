//! Shared test utilities for Cairn crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with a stable database path
//! - [`strategies`] - Proptest generators for rows and operation sequences
//! - [`test_bucket_config`] - Validated bucket configuration for tests
//! - [`test_engine_config`] - Small-cache engine configuration for tests

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::{DEFAULT_DB_FILE, TestDir};

pub mod strategies;

mod config;
pub use config::{
    TEST_BUCKET, TEST_INDEX_1, TEST_INDEX_2, test_bucket_config, test_engine_config,
};

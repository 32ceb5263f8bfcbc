//! Test configuration helpers.
//!
//! Centralizes the bucket and engine settings shared by storage tests.

// Fixtures are built from literals that are valid by construction
#![allow(clippy::expect_used)]

use cairn_types::{EngineConfig, IndexedBucketConfig};

/// Bucket name used by the end-to-end fixtures.
pub const TEST_BUCKET: &str = "testbucket";

/// First fixture index, over the record's first value list.
pub const TEST_INDEX_1: &str = "testindex-1";

/// Second fixture index, over the record's second value list.
pub const TEST_INDEX_2: &str = "testindex-2";

/// Returns a validated configuration for `name` with the given indices.
///
/// # Panics
///
/// Panics if the configuration fails validation.
#[must_use]
pub fn test_bucket_config(name: &str, indices: &[&str]) -> IndexedBucketConfig {
    IndexedBucketConfig::builder()
        .name(name)
        .indices(indices.iter().map(ToString::to_string).collect())
        .build()
        .expect("test bucket config should be valid")
}

/// Returns an engine configuration suitable for tests.
///
/// Uses a 4 MB page cache: small enough for many parallel stores, large
/// enough that fixtures never touch the minimum.
#[must_use]
pub fn test_engine_config() -> EngineConfig {
    EngineConfig::builder()
        .cache_size_bytes(4 * 1024 * 1024)
        .build()
        .expect("test engine config should be valid")
}

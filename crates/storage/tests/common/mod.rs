//! Fixtures shared by the storage integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use cairn_storage::{IndexLookup, IndexedBucket, JsonCodec, PostcardCodec, Record, StorageEngine};
use cairn_test_utils::strategies::RowSpec;
use cairn_test_utils::{
    TEST_BUCKET, TEST_INDEX_1, TEST_INDEX_2, test_bucket_config, test_engine_config,
};
use serde::{Deserialize, Serialize};

/// Record with one value per fixture index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub id: String,
    pub val_1: String,
    pub val_2: String,
}

impl ExampleRecord {
    pub fn new(id: &str, val_1: &str, val_2: &str) -> Self {
        Self { id: id.to_string(), val_1: val_1.to_string(), val_2: val_2.to_string() }
    }
}

impl Record for ExampleRecord {
    fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }

    fn index_values(&self, index: &str) -> Vec<Vec<u8>> {
        match index {
            TEST_INDEX_1 => vec![self.val_1.clone().into_bytes()],
            TEST_INDEX_2 => vec![self.val_2.clone().into_bytes()],
            _ => Vec::new(),
        }
    }
}

/// Record with a list of values per fixture index, built from generated rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRecord {
    pub id: String,
    pub first: Vec<String>,
    pub second: Vec<String>,
}

impl From<&RowSpec> for MultiRecord {
    fn from(row: &RowSpec) -> Self {
        Self { id: row.key.clone(), first: row.first.clone(), second: row.second.clone() }
    }
}

impl Record for MultiRecord {
    fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }

    fn index_values(&self, index: &str) -> Vec<Vec<u8>> {
        let values = match index {
            TEST_INDEX_1 => &self.first,
            TEST_INDEX_2 => &self.second,
            _ => return Vec::new(),
        };
        values.iter().map(|v| v.clone().into_bytes()).collect()
    }
}

pub type ExampleBucket = IndexedBucket<ExampleRecord, JsonCodec<ExampleRecord>>;

/// Opens the fixture bucket in a file-backed store at `path`.
pub fn open_example_bucket(path: &Path, indices: &[&str]) -> (StorageEngine, ExampleBucket) {
    let engine = StorageEngine::open_with_config(path, &test_engine_config()).expect("open engine");
    let bucket = IndexedBucket::open(
        engine.db(),
        test_bucket_config(TEST_BUCKET, indices),
        JsonCodec::new(),
    )
    .expect("open bucket");
    (engine, bucket)
}

/// Builds an expected `read_index` result from string literals.
pub fn lookup(entries: Vec<(&str, Vec<&str>)>) -> IndexLookup {
    entries
        .into_iter()
        .map(|(value, keys)| {
            (value.as_bytes().to_vec(), keys.iter().map(|k| k.as_bytes().to_vec()).collect())
        })
        .collect()
}

pub type MultiBucket = IndexedBucket<MultiRecord, PostcardCodec<MultiRecord>>;

/// Opens a fresh in-memory store holding the multi-value fixture bucket with
/// both fixture indices.
pub fn open_multi_bucket() -> (StorageEngine, MultiBucket) {
    let engine = StorageEngine::in_memory_with_config(&test_engine_config()).expect("open engine");
    let bucket = IndexedBucket::open(
        engine.db(),
        test_bucket_config(TEST_BUCKET, &[TEST_INDEX_1, TEST_INDEX_2]),
        PostcardCodec::new(),
    )
    .expect("open bucket");
    (engine, bucket)
}

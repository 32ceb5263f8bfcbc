//! Proptest strategies for indexed bucket tests.
//!
//! Keys and index values are drawn from tiny alphabets so generated data
//! collides often: shared prefixes like `a`/`aa`/`aaa` and repeated keys are
//! the interesting cases for composite index keys and conflict handling.
//!
//! # Usage
//!
//! ```no_run
//! use cairn_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in strategies::arb_bucket_ops(16)) {
//!         // apply ops to a bucket and check an invariant
//!     }
//! }
//! ```

use proptest::prelude::*;

/// Plain description of a fixture record: a key plus values for two indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSpec {
    /// Primary key.
    pub key: String,
    /// Values for the first index.
    pub first: Vec<String>,
    /// Values for the second index.
    pub second: Vec<String>,
}

/// One batch operation against a bucket.
#[derive(Debug, Clone)]
pub enum BucketOp {
    /// Insert these rows.
    Insert(Vec<RowSpec>),
    /// Replace the index values of the rows with these keys.
    Update(Vec<RowSpec>),
    /// Delete these keys.
    Delete(Vec<String>),
}

/// Generates a record key of 1-3 characters over `[ab]`.
pub fn arb_record_key() -> impl Strategy<Value = String> {
    "[ab]{1,3}"
}

/// Generates an index value of 0-3 characters over `[ab]`, including the
/// empty value.
pub fn arb_index_value() -> impl Strategy<Value = String> {
    "[ab]{0,3}"
}

/// Generates 0-3 index values; duplicates are kept on purpose.
pub fn arb_index_values() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(arb_index_value(), 0..4)
}

/// Generates a single fixture row.
pub fn arb_row() -> impl Strategy<Value = RowSpec> {
    (arb_record_key(), arb_index_values(), arb_index_values())
        .prop_map(|(key, first, second)| RowSpec { key, first, second })
}

/// Generates 1-`max` rows, possibly sharing keys.
pub fn arb_rows(max: usize) -> impl Strategy<Value = Vec<RowSpec>> {
    proptest::collection::vec(arb_row(), 1..=max.max(1))
}

/// Generates a single batch operation of up to 4 records.
pub fn arb_bucket_op() -> impl Strategy<Value = BucketOp> {
    prop_oneof![
        3 => arb_rows(4).prop_map(BucketOp::Insert),
        2 => arb_rows(4).prop_map(BucketOp::Update),
        2 => proptest::collection::vec(arb_record_key(), 1..4).prop_map(BucketOp::Delete),
    ]
}

/// Generates a sequence of up to `max` batch operations.
pub fn arb_bucket_ops(max: usize) -> impl Strategy<Value = Vec<BucketOp>> {
    proptest::collection::vec(arb_bucket_op(), 0..=max)
}

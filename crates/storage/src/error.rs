//! Error types for indexed bucket operations.

use cairn_types::{CodecError, ConfigError, ErrorCode};
use snafu::{Snafu, ensure};
use tokio_util::sync::CancellationToken;

/// Result type for indexed bucket operations.
pub type Result<T, E = BucketError> = std::result::Result<T, E>;

/// Boxed error returned by an update mutator.
pub type MutatorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`IndexedBucket`](crate::IndexedBucket) operations.
///
/// Every error aborts the transaction it occurred in; nothing is committed.
///
/// # Recovery Guide
///
/// | Variant        | Retryable | Recovery Action                                    |
/// | -------------- | --------- | -------------------------------------------------- |
/// | `KeyConflict`  | No        | Update the existing record or delete it first      |
/// | `UnknownKey`   | No        | Insert the record before updating it               |
/// | `MissingIndex` | No        | Run `reindex` to rebuild the index buckets         |
/// | `UnknownIndex` | No        | Add the index to the configuration and reopen      |
/// | `Mutator`      | No        | Inspect the wrapped mutator error                  |
/// | `Cancelled`    | Yes       | Retry with a fresh cancellation token              |
/// | `Transaction`  | Yes       | Retry with backoff                                 |
/// | `Codec`        | No        | Open the bucket with the codec it was written with |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BucketError {
    /// Insert found an existing record with the same primary key.
    #[snafu(display("Key conflict: {key} already exists"))]
    KeyConflict {
        /// The conflicting key (lossy UTF-8).
        key: String,
    },

    /// Update referenced a key that is not stored.
    #[snafu(display("Unknown key: {key}"))]
    UnknownKey {
        /// The missing key (lossy UTF-8).
        key: String,
    },

    /// Update listed the same key more than once.
    #[snafu(display("Duplicate key in update: {key}"))]
    DuplicateKey {
        /// The repeated key (lossy UTF-8).
        key: String,
    },

    /// The update mutator changed a record's primary key.
    #[snafu(display("Mutator changed primary key from {before} to {after}"))]
    KeyMutated {
        /// Key before the mutator ran (lossy UTF-8).
        before: String,
        /// Key after the mutator ran (lossy UTF-8).
        after: String,
    },

    /// A record key is malformed.
    #[snafu(display("Invalid key: {reason}"))]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// An active index has no backing bucket.
    #[snafu(display("Missing index bucket {index}; reindex required"))]
    MissingIndex {
        /// The index name.
        index: String,
    },

    /// The index name is not active for this bucket.
    #[snafu(display("Index {index} is not active on bucket {bucket}"))]
    UnknownIndex {
        /// The requested index name.
        index: String,
        /// The primary bucket name.
        bucket: String,
    },

    /// The update mutator failed.
    #[snafu(display("Mutator failed: {source}"))]
    Mutator {
        /// The error returned by the mutator.
        source: MutatorError,
    },

    /// The operation was cancelled by the caller.
    #[snafu(display("Operation cancelled"))]
    Cancelled,

    /// Index value too large for the composite key length prefix.
    #[snafu(display("Index value too large: {size} bytes (max {max})"))]
    KeyTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Persisted metadata is malformed.
    #[snafu(display("Corrupted bucket state: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// Record encoding or decoding failed.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
    },

    /// Bucket configuration is invalid.
    #[snafu(display("Config error: {source}"))]
    Config {
        /// The underlying validation error.
        source: ConfigError,
    },

    /// Engine storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// The underlying redb error.
        source: redb::StorageError,
    },

    /// Engine table error.
    #[snafu(display("Table error: {source}"))]
    Table {
        /// The underlying redb error.
        source: redb::TableError,
    },

    /// Engine transaction error.
    #[snafu(display("Transaction error: {source}"))]
    Transaction {
        /// The underlying redb error.
        source: redb::TransactionError,
    },

    /// Engine commit error.
    #[snafu(display("Commit error: {source}"))]
    Commit {
        /// The underlying redb error.
        source: redb::CommitError,
    },

    /// Unexpected internal failure.
    #[snafu(display("Internal error: {message}"))]
    Internal {
        /// Error description.
        message: String,
    },
}

impl BucketError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::KeyConflict { .. } => ErrorCode::BucketKeyConflict,
            Self::UnknownKey { .. } => ErrorCode::BucketUnknownKey,
            Self::DuplicateKey { .. } | Self::KeyMutated { .. } | Self::InvalidKey { .. } => {
                ErrorCode::AppInvalidArgument
            },
            Self::MissingIndex { .. } => ErrorCode::BucketMissingIndex,
            Self::UnknownIndex { .. } => ErrorCode::BucketUnknownIndex,
            Self::Mutator { .. } => ErrorCode::BucketMutator,
            Self::Cancelled => ErrorCode::BucketCancelled,
            Self::KeyTooLarge { .. } => ErrorCode::StorageKeyEncoding,
            Self::Corrupted { .. } => ErrorCode::StorageCorruption,
            Self::Codec { .. } => ErrorCode::AppSerialization,
            Self::Config { .. } => ErrorCode::AppConfig,
            Self::Storage { .. } | Self::Table { .. } => ErrorCode::StorageTableOperation,
            Self::Transaction { .. } | Self::Commit { .. } => ErrorCode::StorageTransaction,
            Self::Internal { .. } => ErrorCode::AppInternal,
        }
    }

    /// Whether this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Suggested recovery action for this error.
    #[must_use]
    pub const fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }
}

/// Renders a key for error messages and logs.
pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Fails with [`BucketError::Cancelled`] once the caller's token fires.
pub(crate) fn ensure_not_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    ensure!(!cancel.is_some_and(CancellationToken::is_cancelled), CancelledSnafu);
    Ok(())
}

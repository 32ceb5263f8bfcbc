//! Machine-readable error codes shared across Cairn crates.
//!
//! Every error variant raised by the storage layer maps to an [`ErrorCode`]
//! with a unique numeric identifier, a retryability classification, and a
//! suggested recovery action. Crates keep their own `snafu` error enums and
//! expose a `code()` method returning one of these values.

/// Machine-readable error codes for programmatic error handling.
///
/// Codes are organized into ranges:
///
/// | Range       | Domain      | Examples                                      |
/// |-------------|-------------|-----------------------------------------------|
/// | 1000–1099   | Storage     | Database open, transaction, table ops         |
/// | 1100–1199   | Storage     | Corruption of metadata or index entries       |
/// | 3100–3199   | Bucket      | Key conflicts, unknown keys, missing indices  |
/// | 3200–3299   | Application | Invalid arguments, serialization, config      |
///
/// Use [`ErrorCode::as_u16`] to persist or transmit a code and
/// [`ErrorCode::from_u16`] to read it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Storage errors (1000–1199) ---
    /// Database file could not be opened.
    StorageDatabaseOpen = 1000,
    /// Transaction begin or commit failed.
    StorageTransaction = 1001,
    /// B-tree table operation failed.
    StorageTableOperation = 1002,
    /// Key or index value cannot be encoded into a composite key.
    StorageKeyEncoding = 1003,
    /// Persisted metadata or index entries are malformed.
    StorageCorruption = 1101,

    // --- Bucket errors (3100–3199) ---
    /// Insert found an existing primary key.
    BucketKeyConflict = 3100,
    /// Update referenced a primary key that is not stored.
    BucketUnknownKey = 3101,
    /// An active index has no backing bucket.
    BucketMissingIndex = 3102,
    /// Lookup against an index name that is not active.
    BucketUnknownIndex = 3103,
    /// The update mutator returned an error.
    BucketMutator = 3104,
    /// The caller cancelled the operation.
    BucketCancelled = 3105,

    // --- Application errors (3200–3299) ---
    /// Malformed argument (empty key, duplicate key, mutated key).
    AppInvalidArgument = 3200,
    /// Record or metadata (de)serialization failed.
    AppSerialization = 3201,
    /// Configuration value failed validation.
    AppConfig = 3202,
    /// Unexpected internal state.
    AppInternal = 3204,
}

impl ErrorCode {
    /// Returns the numeric value of this code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parses a numeric value back into an [`ErrorCode`].
    ///
    /// Returns `None` for values that do not correspond to a known code.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::StorageDatabaseOpen),
            1001 => Some(Self::StorageTransaction),
            1002 => Some(Self::StorageTableOperation),
            1003 => Some(Self::StorageKeyEncoding),
            1101 => Some(Self::StorageCorruption),
            3100 => Some(Self::BucketKeyConflict),
            3101 => Some(Self::BucketUnknownKey),
            3102 => Some(Self::BucketMissingIndex),
            3103 => Some(Self::BucketUnknownIndex),
            3104 => Some(Self::BucketMutator),
            3105 => Some(Self::BucketCancelled),
            3200 => Some(Self::AppInvalidArgument),
            3201 => Some(Self::AppSerialization),
            3202 => Some(Self::AppConfig),
            3204 => Some(Self::AppInternal),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Retryable errors may succeed on a subsequent attempt, typically after
    /// backoff. Non-retryable errors require corrective action before retrying.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StorageTransaction | Self::BucketCancelled)
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StorageDatabaseOpen => {
                "Verify the database path exists with correct permissions and is not locked by another process."
            },
            Self::StorageTransaction => "Retry the transaction with backoff.",
            Self::StorageTableOperation => {
                "Check disk space and I/O health. Key and value sizes must fit the engine limits."
            },
            Self::StorageKeyEncoding => "Shorten the index value or record key.",
            Self::StorageCorruption => {
                "Restore from backup, or run reindex if only index buckets are affected."
            },
            Self::BucketKeyConflict => {
                "Use update for existing records, or delete the record before inserting it again."
            },
            Self::BucketUnknownKey => "Insert the record before updating it.",
            Self::BucketMissingIndex => "Run reindex to rebuild the index buckets.",
            Self::BucketUnknownIndex => {
                "Add the index to the bucket configuration and reopen the bucket."
            },
            Self::BucketMutator => "Inspect the mutator error; no changes were committed.",
            Self::BucketCancelled => "Retry the operation with a fresh cancellation token.",
            Self::AppInvalidArgument => "Fix the request parameters and resubmit.",
            Self::AppSerialization => {
                "Codec mismatch or data corruption. Verify the bucket is opened with the codec it was written with."
            },
            Self::AppConfig => "Fix the configuration value and reopen the bucket.",
            Self::AppInternal => "Unexpected state; report as an issue with context.",
        }
    }
}

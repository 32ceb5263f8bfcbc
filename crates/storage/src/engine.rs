//! redb storage engine wrapper.
//!
//! Provides a thin wrapper around redb with:
//! - Database lifecycle management
//! - Page cache sizing from [`EngineConfig`]
//! - Convenient file-backed and in-memory constructors

use std::path::Path;
use std::sync::Arc;

use cairn_types::{EngineConfig, ErrorCode};
use redb::backends::InMemoryBackend;
use redb::{Database, TableHandle};
use snafu::{ResultExt, Snafu};
use tracing::info;

/// Error context for storage engine operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// Opening or creating the database failed.
    #[snafu(display("Failed to open database at {path}: {source}"))]
    Open {
        /// Database path, or `:memory:`.
        path: String,
        /// The underlying redb error.
        source: redb::DatabaseError,
    },

    /// Beginning a transaction failed.
    #[snafu(display("Transaction failed: {source}"))]
    Transaction {
        /// The underlying redb error.
        source: redb::TransactionError,
    },

    /// A storage operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    Storage {
        /// The underlying redb error.
        source: redb::StorageError,
    },
}

impl EngineError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Open { .. } => ErrorCode::StorageDatabaseOpen,
            Self::Transaction { .. } => ErrorCode::StorageTransaction,
            Self::Storage { .. } => ErrorCode::StorageTableOperation,
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

/// Storage engine backed by redb.
///
/// Cloning is cheap; every clone shares the same database handle.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Database>,
}

impl StorageEngine {
    /// Open or create a database at the given path with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::open_with_config(path, &EngineConfig::default())
    }

    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] if the file cannot be opened or created.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let db = Database::builder()
            .set_cache_size(config.cache_size_bytes)
            .create(path)
            .context(OpenSnafu { path: path.display().to_string() })?;

        info!(
            path = %path.display(),
            cache_size_bytes = config.cache_size_bytes,
            "Opened storage engine"
        );
        Ok(Self { db: Arc::new(db) })
    }

    /// Create a new in-memory database with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] if the backend cannot be initialized.
    pub fn in_memory() -> Result<Self, EngineError> {
        Self::in_memory_with_config(&EngineConfig::default())
    }

    /// Create a new in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] if the backend cannot be initialized.
    pub fn in_memory_with_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let db = Database::builder()
            .set_cache_size(config.cache_size_bytes)
            .create_with_backend(InMemoryBackend::new())
            .context(OpenSnafu { path: ":memory:".to_string() })?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a clone of the database handle.
    #[must_use]
    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    /// Names of every table currently present, in engine order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the read transaction fails.
    pub fn table_names(&self) -> Result<Vec<String>, EngineError> {
        let txn = self.db.begin_read().context(TransactionSnafu)?;
        let tables = txn.list_tables().context(StorageSnafu)?;
        Ok(tables.map(|t| t.name().to_string()).collect())
    }
}

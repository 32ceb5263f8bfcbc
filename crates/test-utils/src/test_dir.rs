//! Temporary directories for file-backed stores.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] and knows where a test's database
//! file lives, so reopen tests can close and reopen the same store.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// File name of the default database inside a [`TestDir`].
pub const DEFAULT_DB_FILE: &str = "cairn.redb";

/// A managed temporary directory for tests.
///
/// The directory and every database in it are removed when this struct is
/// dropped.
///
/// # Example
///
/// ```
/// use cairn_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let first = dir.db_path();
/// // Open a StorageEngine at `first`, drop it, then reopen the same path.
/// assert_eq!(first, dir.db_path());
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::with_prefix("cairn-test-").expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Path of the default database file. Stable for the directory's lifetime.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.join(DEFAULT_DB_FILE)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

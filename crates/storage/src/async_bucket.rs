//! Async facade over [`IndexedBucket`].
//!
//! redb transactions block, so each call runs on tokio's blocking pool. Every
//! operation takes a [`CancellationToken`]; the transaction checks it before
//! starting and between records, and a cancelled operation commits nothing.

use redb::WriteTransaction;
use tokio_util::sync::CancellationToken;

use crate::bucket::{IndexLookup, IndexedBucket};
use crate::codec::Codec;
use crate::error::{BucketError, MutatorError, Result, ensure_not_cancelled};
use crate::integrity::IntegrityReport;
use crate::record::Record;

/// Runs [`IndexedBucket`] operations off the async executor.
pub struct AsyncIndexedBucket<R, C> {
    bucket: IndexedBucket<R, C>,
}

impl<R, C> Clone for AsyncIndexedBucket<R, C> {
    fn clone(&self) -> Self {
        Self { bucket: self.bucket.clone() }
    }
}

impl<R, C> std::fmt::Debug for AsyncIndexedBucket<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIndexedBucket").field("bucket", &self.bucket).finish()
    }
}

impl<R, C> From<IndexedBucket<R, C>> for AsyncIndexedBucket<R, C> {
    fn from(bucket: IndexedBucket<R, C>) -> Self {
        Self { bucket }
    }
}

impl<R, C> AsyncIndexedBucket<R, C>
where
    R: Record + Send + 'static,
    C: Codec<R> + Send + Sync + 'static,
{
    /// Wraps an open bucket.
    #[must_use]
    pub fn new(bucket: IndexedBucket<R, C>) -> Self {
        Self { bucket }
    }

    /// The wrapped synchronous bucket.
    #[must_use]
    pub fn bucket(&self) -> &IndexedBucket<R, C> {
        &self.bucket
    }

    /// See [`IndexedBucket::insert`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn insert(&self, records: Vec<R>, cancel: &CancellationToken) -> Result<()> {
        self.run(cancel, move |bucket, token| bucket.insert_with(&records, Some(token))).await
    }

    /// See [`IndexedBucket::update`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn update<F, E>(
        &self,
        records: Vec<R>,
        mutator: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnOnce(&WriteTransaction, &mut [R]) -> std::result::Result<(), E> + Send + 'static,
        E: Into<MutatorError>,
    {
        self.run(cancel, move |bucket, token| bucket.update_with(&records, mutator, Some(token)))
            .await
    }

    /// See [`IndexedBucket::delete`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn delete<K>(&self, keys: Vec<K>, cancel: &CancellationToken) -> Result<()>
    where
        K: AsRef<[u8]> + Send + 'static,
    {
        self.run(cancel, move |bucket, token| bucket.delete_with(&keys, Some(token))).await
    }

    /// See [`IndexedBucket::read`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn read<K>(&self, keys: Vec<K>, cancel: &CancellationToken) -> Result<Vec<Option<R>>>
    where
        K: AsRef<[u8]> + Send + 'static,
    {
        self.run(cancel, move |bucket, token| bucket.read_with(&keys, Some(token))).await
    }

    /// See [`IndexedBucket::read_raw`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn read_raw(
        &self,
        key: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        self.run(cancel, move |bucket, _| bucket.read_raw(&key)).await
    }

    /// See [`IndexedBucket::list`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn list(
        &self,
        offset: usize,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<R>, u64)> {
        self.run(cancel, move |bucket, token| bucket.list_with(offset, limit, Some(token))).await
    }

    /// See [`IndexedBucket::read_index`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn read_index<V>(
        &self,
        index: impl Into<String>,
        values: Vec<V>,
        cancel: &CancellationToken,
    ) -> Result<IndexLookup>
    where
        V: AsRef<[u8]> + Send + 'static,
    {
        let index = index.into();
        self.run(cancel, move |bucket, token| bucket.read_index_with(&index, &values, Some(token)))
            .await
    }

    /// See [`IndexedBucket::reindex`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn reindex(&self, cancel: &CancellationToken) -> Result<()> {
        self.run(cancel, |bucket, token| bucket.reindex_with(Some(token))).await
    }

    /// See [`IndexedBucket::verify`].
    ///
    /// # Errors
    ///
    /// As the synchronous call, plus [`BucketError::Cancelled`].
    pub async fn verify(&self, cancel: &CancellationToken) -> Result<IntegrityReport> {
        self.run(cancel, |bucket, token| bucket.verify_with(Some(token))).await
    }

    async fn run<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&IndexedBucket<R, C>, &CancellationToken) -> Result<T> + Send + 'static,
    {
        ensure_not_cancelled(Some(cancel))?;

        let bucket = self.bucket.clone();
        let token = cancel.clone();
        tokio::task::spawn_blocking(move || op(&bucket, &token))
            .await
            .map_err(|e| BucketError::Internal { message: format!("blocking task failed: {e}") })?
    }
}

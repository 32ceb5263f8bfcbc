//! Indexed bucket: records plus secondary indices kept consistent under redb
//! transactions.
//!
//! Every mutation runs in one write transaction that touches the primary table
//! and every active index table, so readers observe either all of a batch or
//! none of it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableError, WriteTransaction};
use snafu::{OptionExt, ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use cairn_types::IndexedBucketConfig;

use crate::codec::Codec;
use crate::error::{
    BucketError, CodecSnafu, CommitSnafu, ConfigSnafu, DuplicateKeySnafu, InvalidKeySnafu,
    KeyConflictSnafu, KeyMutatedSnafu, MissingIndexSnafu, MutatorError, Result, StorageSnafu,
    TableSnafu, TransactionSnafu, UnknownIndexSnafu, UnknownKeySnafu, display_key,
    ensure_not_cancelled,
};
use crate::indexes::{
    EntrySet, collect_entries, insert_entries, open_index_writers, rebuild_indices,
    record_entries, remove_entries, scan_index,
};
use crate::integrity::{self, IntegrityReport};
use crate::record::Record;
use crate::schema::{self, Reconciliation};
use crate::tables::{index_table, primary_table};

/// Record keys per requested index value.
pub type IndexLookup = BTreeMap<Vec<u8>, Vec<Vec<u8>>>;

struct BucketInner<C> {
    db: Arc<Database>,
    config: IndexedBucketConfig,
    codec: C,
    reconciliation: Reconciliation,
}

/// A bucket of records with secondary indices.
///
/// Records live in the primary table keyed by [`Record::key`]; each active
/// index gets a table of composite `(value, record key)` entries. Opening the
/// bucket reconciles the configured index set with the one persisted by the
/// previous open, building indices that are new or whose tables are missing.
///
/// Cloning is cheap and clones share state. All operations are safe to call
/// concurrently: redb serializes writers and gives each reader a snapshot.
///
/// # Example
///
/// ```no_run
/// use cairn_storage::{IndexedBucket, JsonCodec, Record, StorageEngine};
/// use cairn_types::IndexedBucketConfig;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Task {
///     id: String,
///     status: String,
/// }
///
/// impl Record for Task {
///     fn key(&self) -> &[u8] {
///         self.id.as_bytes()
///     }
///
///     fn index_values(&self, index: &str) -> Vec<Vec<u8>> {
///         match index {
///             "by_status" => vec![self.status.clone().into_bytes()],
///             _ => Vec::new(),
///         }
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = StorageEngine::open("tasks.redb")?;
/// let config = IndexedBucketConfig::builder()
///     .name("tasks")
///     .indices(vec!["by_status".to_string()])
///     .build()?;
/// let tasks = IndexedBucket::open(engine.db(), config, JsonCodec::<Task>::new())?;
///
/// tasks.insert(&[Task { id: "t1".into(), status: "queued".into() }])?;
/// let queued = tasks.read_index("by_status", &["queued"])?;
/// assert_eq!(queued[b"queued".as_slice()], vec![b"t1".to_vec()]);
/// # Ok(())
/// # }
/// ```
pub struct IndexedBucket<R, C> {
    inner: Arc<BucketInner<C>>,
    _record: PhantomData<fn() -> R>,
}

impl<R, C> Clone for IndexedBucket<R, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), _record: PhantomData }
    }
}

impl<R, C> fmt::Debug for IndexedBucket<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedBucket")
            .field("name", &self.inner.config.name)
            .field("indices", &self.inner.config.indices)
            .finish_non_exhaustive()
    }
}

impl<R, C> IndexedBucket<R, C> {
    /// Primary bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Active index names, in configuration order.
    #[must_use]
    pub fn indices(&self) -> &[String] {
        &self.inner.config.indices
    }

    /// The configuration this bucket was opened with.
    #[must_use]
    pub fn config(&self) -> &IndexedBucketConfig {
        &self.inner.config
    }

    /// Shared database handle.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// The record codec.
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// What open-time reconciliation did to the index tables.
    #[must_use]
    pub fn reconciliation(&self) -> &Reconciliation {
        &self.inner.reconciliation
    }

    fn is_active(&self, index: &str) -> bool {
        self.inner.config.indices.iter().any(|i| i == index)
    }
}

impl<R, C> IndexedBucket<R, C>
where
    R: Record,
    C: Codec<R>,
{
    /// Opens the bucket, creating missing tables and building new indices.
    ///
    /// # Errors
    ///
    /// - [`BucketError::Config`] if the configuration is invalid
    /// - [`BucketError::Corrupted`] if the persisted index descriptor is unreadable
    /// - engine errors from the reconciliation transaction
    #[instrument(skip_all, fields(bucket = %config.name))]
    pub fn open(db: Arc<Database>, config: IndexedBucketConfig, codec: C) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;

        let reconciliation = schema::reconcile(&db, &config, &codec)?;
        info!(
            indices = config.indices.len(),
            rebuilt = reconciliation.rebuilt.len(),
            orphaned = reconciliation.orphaned.len(),
            "Opened indexed bucket"
        );

        Ok(Self {
            inner: Arc::new(BucketInner { db, config, codec, reconciliation }),
            _record: PhantomData,
        })
    }

    /// Inserts records atomically.
    ///
    /// # Errors
    ///
    /// - [`BucketError::KeyConflict`] if any key is already stored, including
    ///   a key repeated within `records`
    /// - [`BucketError::InvalidKey`] for an empty key
    /// - [`BucketError::MissingIndex`] if an active index table has gone missing
    pub fn insert(&self, records: &[R]) -> Result<()> {
        self.insert_with(records, None)
    }

    /// Applies `mutator` to the stored copies of `records` and re-files them.
    ///
    /// Only the keys of `records` are used: the mutator receives freshly
    /// decoded copies from the store together with the live write transaction,
    /// which it may use to open and read other tables. No table of this bucket
    /// is held open while it runs.
    ///
    /// # Errors
    ///
    /// - [`BucketError::UnknownKey`] if a key is not stored
    /// - [`BucketError::DuplicateKey`] if a key appears twice
    /// - [`BucketError::Mutator`] wrapping the mutator's error
    /// - [`BucketError::KeyMutated`] if the mutator changed a primary key
    pub fn update<F, E>(&self, records: &[R], mutator: F) -> Result<()>
    where
        F: FnOnce(&WriteTransaction, &mut [R]) -> std::result::Result<(), E>,
        E: Into<MutatorError>,
    {
        self.update_with(records, mutator, None)
    }

    /// Removes records and their index entries. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns engine and codec errors; the transaction is rolled back.
    pub fn delete<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<()> {
        self.delete_with(keys, None)
    }

    /// Reads records by key, in input order. Absent keys yield `None`.
    ///
    /// # Errors
    ///
    /// Returns engine and codec errors.
    pub fn read<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<R>>> {
        self.read_with(keys, None)
    }

    /// Reads the stored bytes of one record without decoding them.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    pub fn read_raw(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
        let bytes = primary.get(key.as_ref()).context(StorageSnafu)?.map(|v| v.value().to_vec());
        Ok(bytes)
    }

    /// Lists records in key order, skipping `offset` and returning at most
    /// `limit` (`None` for no limit), together with the total record count.
    ///
    /// # Errors
    ///
    /// Returns engine and codec errors.
    pub fn list(&self, offset: usize, limit: Option<usize>) -> Result<(Vec<R>, u64)> {
        self.list_with(offset, limit, None)
    }

    /// Looks up the record keys filed under each of `values` in `index`.
    ///
    /// Every requested value appears in the result; values without matches
    /// map to an empty list. Keys for one value are in ascending byte order.
    ///
    /// # Errors
    ///
    /// - [`BucketError::UnknownIndex`] if `index` is not active
    /// - [`BucketError::MissingIndex`] if its table does not exist
    pub fn read_index<V: AsRef<[u8]>>(&self, index: &str, values: &[V]) -> Result<IndexLookup> {
        self.read_index_with(index, values, None)
    }

    /// Rebuilds every active index from the primary table in one transaction.
    ///
    /// # Errors
    ///
    /// Returns engine and codec errors; the previous index state is kept.
    pub fn reindex(&self) -> Result<()> {
        self.reindex_with(None)
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    pub fn len(&self) -> Result<u64> {
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
        primary.len().context(StorageSnafu)
    }

    /// Whether the bucket holds no records.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether a record is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
        let found = primary.get(key.as_ref()).context(StorageSnafu)?.is_some();
        Ok(found)
    }

    /// Compares every active index against the primary table.
    ///
    /// # Errors
    ///
    /// Returns engine and codec errors. Index inconsistencies, including
    /// missing tables, are reported in the [`IntegrityReport`].
    pub fn verify(&self) -> Result<IntegrityReport> {
        self.verify_with(None)
    }

    #[instrument(skip_all, fields(bucket = %self.name(), records = records.len()))]
    pub(crate) fn insert_with(
        &self,
        records: &[R],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        ensure_not_cancelled(cancel)?;
        let inner = &*self.inner;
        let txn = inner.db.begin_write().context(TransactionSnafu)?;

        let mut added = 0;
        {
            let mut primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
            let mut indexes = open_index_writers(&txn, self.indices())?;

            for record in records {
                ensure_not_cancelled(cancel)?;
                let key = record.key();
                ensure!(
                    !key.is_empty(),
                    InvalidKeySnafu { reason: "record key must not be empty" }
                );
                ensure!(
                    primary.get(key).context(StorageSnafu)?.is_none(),
                    KeyConflictSnafu { key: display_key(key) }
                );

                let bytes = inner.codec.encode(record).context(CodecSnafu)?;
                primary.insert(key, bytes.as_slice()).context(StorageSnafu)?;
                for (index, table) in self.indices().iter().zip(indexes.iter_mut()) {
                    added += insert_entries(table, &record_entries(record, index)?)?;
                }
            }
        }

        ensure_not_cancelled(cancel)?;
        txn.commit().context(CommitSnafu)?;
        debug!(entries_added = added, "Inserted records");
        Ok(())
    }

    #[instrument(skip_all, fields(bucket = %self.name(), records = records.len()))]
    pub(crate) fn update_with<F, E>(
        &self,
        records: &[R],
        mutator: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<()>
    where
        F: FnOnce(&WriteTransaction, &mut [R]) -> std::result::Result<(), E>,
        E: Into<MutatorError>,
    {
        ensure_not_cancelled(cancel)?;
        let inner = &*self.inner;
        let txn = inner.db.begin_write().context(TransactionSnafu)?;

        let mut stored = {
            let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
            let mut seen = HashSet::with_capacity(records.len());
            let mut stored = Vec::with_capacity(records.len());
            for record in records {
                ensure_not_cancelled(cancel)?;
                let key = record.key();
                ensure!(seen.insert(key), DuplicateKeySnafu { key: display_key(key) });
                let bytes = primary
                    .get(key)
                    .context(StorageSnafu)?
                    .map(|v| v.value().to_vec())
                    .context(UnknownKeySnafu { key: display_key(key) })?;
                stored.push(inner.codec.decode(&bytes).context(CodecSnafu)?);
            }
            stored
        };

        let mut keys: Vec<Vec<u8>> = stored.iter().map(|r| r.key().to_vec()).collect();
        keys.sort_unstable();
        let before = self.entries_by_index(&stored)?;

        ensure_not_cancelled(cancel)?;
        mutator(&txn, &mut stored).map_err(|e| BucketError::Mutator { source: e.into() })?;

        // The mutator may reorder records but must keep the same key set.
        let mut mutated: Vec<&[u8]> = stored.iter().map(R::key).collect();
        mutated.sort_unstable();
        if let Some((old, new)) =
            keys.iter().zip(&mutated).find(|(old, new)| old.as_slice() != **new)
        {
            return KeyMutatedSnafu { before: display_key(old), after: display_key(new) }.fail();
        }
        let after = self.entries_by_index(&stored)?;

        let (mut added, mut removed) = (0, 0);
        {
            let mut primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
            let mut indexes = open_index_writers(&txn, self.indices())?;

            for ((table, before), after) in indexes.iter_mut().zip(&before).zip(&after) {
                removed += remove_entries(table, before.difference(after))?;
                added += insert_entries(table, after.difference(before))?;
            }
            for record in &stored {
                let bytes = inner.codec.encode(record).context(CodecSnafu)?;
                primary.insert(record.key(), bytes.as_slice()).context(StorageSnafu)?;
            }
        }

        ensure_not_cancelled(cancel)?;
        txn.commit().context(CommitSnafu)?;
        debug!(entries_added = added, entries_removed = removed, "Updated records");
        Ok(())
    }

    #[instrument(skip_all, fields(bucket = %self.name(), keys = keys.len()))]
    pub(crate) fn delete_with<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        ensure_not_cancelled(cancel)?;
        let inner = &*self.inner;
        let txn = inner.db.begin_write().context(TransactionSnafu)?;

        let (mut deleted, mut removed) = (0, 0);
        {
            let mut primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;
            let mut indexes = open_index_writers(&txn, self.indices())?;

            for key in keys {
                ensure_not_cancelled(cancel)?;
                let Some(bytes) =
                    primary.remove(key.as_ref()).context(StorageSnafu)?.map(|v| v.value().to_vec())
                else {
                    continue;
                };

                let record = inner.codec.decode(&bytes).context(CodecSnafu)?;
                for (index, table) in self.indices().iter().zip(indexes.iter_mut()) {
                    removed += remove_entries(table, &record_entries(&record, index)?)?;
                }
                deleted += 1;
            }
        }

        ensure_not_cancelled(cancel)?;
        txn.commit().context(CommitSnafu)?;
        debug!(deleted, entries_removed = removed, "Deleted records");
        Ok(())
    }

    pub(crate) fn read_with<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Option<R>>> {
        ensure_not_cancelled(cancel)?;
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;

        keys.iter()
            .map(|key| {
                ensure_not_cancelled(cancel)?;
                let stored = primary.get(key.as_ref()).context(StorageSnafu)?;
                stored.map(|v| self.inner.codec.decode(v.value()).context(CodecSnafu)).transpose()
            })
            .collect()
    }

    pub(crate) fn list_with(
        &self,
        offset: usize,
        limit: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Vec<R>, u64)> {
        ensure_not_cancelled(cancel)?;
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let primary = txn.open_table(primary_table(self.name())).context(TableSnafu)?;

        let total = primary.len().context(StorageSnafu)?;
        let mut records = Vec::new();
        let mut entries = primary.iter().context(StorageSnafu)?;
        for entry in entries.by_ref().take(offset) {
            ensure_not_cancelled(cancel)?;
            entry.context(StorageSnafu)?;
        }
        for entry in entries.take(limit.unwrap_or(usize::MAX)) {
            ensure_not_cancelled(cancel)?;
            let (_, bytes) = entry.context(StorageSnafu)?;
            records.push(self.inner.codec.decode(bytes.value()).context(CodecSnafu)?);
        }

        Ok((records, total))
    }

    #[instrument(skip_all, fields(bucket = %self.name(), index = %index, values = values.len()))]
    pub(crate) fn read_index_with<V: AsRef<[u8]>>(
        &self,
        index: &str,
        values: &[V],
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexLookup> {
        ensure!(self.is_active(index), UnknownIndexSnafu { index, bucket: self.name() });
        ensure_not_cancelled(cancel)?;

        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let table = match txn.open_table(index_table(index)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                warn!("Index table missing; reindex required");
                return MissingIndexSnafu { index }.fail();
            },
            Err(source) => return Err(source).context(TableSnafu),
        };

        let mut lookup = IndexLookup::new();
        for value in values {
            ensure_not_cancelled(cancel)?;
            let value = value.as_ref();
            if !lookup.contains_key(value) {
                lookup.insert(value.to_vec(), scan_index(&table, value)?);
            }
        }
        Ok(lookup)
    }

    #[instrument(skip_all, fields(bucket = %self.name()))]
    pub(crate) fn reindex_with(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        ensure_not_cancelled(cancel)?;
        let inner = &*self.inner;
        let txn = inner.db.begin_write().context(TransactionSnafu)?;

        let records = rebuild_indices(&txn, self.name(), self.indices(), &inner.codec, cancel)?;

        ensure_not_cancelled(cancel)?;
        txn.commit().context(CommitSnafu)?;
        info!(records, indices = self.indices().len(), "Reindexed bucket");
        Ok(())
    }

    #[instrument(skip_all, fields(bucket = %self.name()))]
    pub(crate) fn verify_with(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<IntegrityReport> {
        ensure_not_cancelled(cancel)?;
        let txn = self.inner.db.begin_read().context(TransactionSnafu)?;
        let report =
            integrity::scan(&txn, self.name(), self.indices(), &self.inner.codec, cancel)?;

        for finding in report.indices.iter().filter(|f| !f.is_consistent()) {
            warn!(
                index = %finding.index,
                table_missing = finding.table_missing,
                missing = finding.missing.len(),
                orphaned = finding.orphaned.len(),
                "Index inconsistent with primary records"
            );
        }
        Ok(report)
    }

    /// Union of the entries `records` contribute, one set per active index.
    fn entries_by_index(&self, records: &[R]) -> Result<Vec<EntrySet>> {
        self.indices()
            .iter()
            .map(|index| {
                let mut entries = EntrySet::new();
                for record in records {
                    collect_entries(record, index, &mut entries)?;
                }
                Ok(entries)
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::cell::Cell;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::codec::{JsonCodec, PostcardCodec};
    use crate::engine::StorageEngine;
    use crate::tables::meta_table;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        status: String,
        tags: Vec<String>,
    }

    impl Record for Task {
        fn key(&self) -> &[u8] {
            self.id.as_bytes()
        }

        fn index_values(&self, index: &str) -> Vec<Vec<u8>> {
            match index {
                "status" => vec![self.status.clone().into_bytes()],
                "tags" => self.tags.iter().map(|t| t.clone().into_bytes()).collect(),
                _ => Vec::new(),
            }
        }
    }

    thread_local! {
        static CANCEL_WHILE_INDEXING: Cell<Option<CancellationToken>> = const { Cell::new(None) };
    }

    /// Record that fires the armed token whenever its index values are read.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cancelling {
        id: String,
    }

    impl Cancelling {
        fn new(id: &str) -> Self {
            Self { id: id.to_string() }
        }
    }

    impl Record for Cancelling {
        fn key(&self) -> &[u8] {
            self.id.as_bytes()
        }

        fn index_values(&self, _index: &str) -> Vec<Vec<u8>> {
            if let Some(token) = CANCEL_WHILE_INDEXING.take() {
                token.cancel();
                CANCEL_WHILE_INDEXING.set(Some(token));
            }
            vec![b"v".to_vec()]
        }
    }

    fn open_cancelling(engine: &StorageEngine) -> IndexedBucket<Cancelling, JsonCodec<Cancelling>> {
        let config = IndexedBucketConfig::builder()
            .name("cancelling")
            .indices(vec!["value".to_string()])
            .build()
            .unwrap();
        IndexedBucket::open(engine.db(), config, JsonCodec::new()).unwrap()
    }

    fn task(id: &str, status: &str, tags: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            status: status.to_string(),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    fn open_tasks(engine: &StorageEngine) -> IndexedBucket<Task, JsonCodec<Task>> {
        let config = IndexedBucketConfig::builder()
            .name("tasks")
            .indices(vec!["status".to_string(), "tags".to_string()])
            .build()
            .unwrap();
        IndexedBucket::open(engine.db(), config, JsonCodec::new()).unwrap()
    }

    fn keys(ids: &[&str]) -> Vec<Vec<u8>> {
        ids.iter().map(|id| id.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_insert_and_read() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);

        tasks.insert(&[task("t1", "queued", &["a"]), task("t2", "done", &[])]).unwrap();

        let read = tasks.read(&["t2", "t9", "t1"]).unwrap();
        assert_eq!(read[0], Some(task("t2", "done", &[])));
        assert_eq!(read[1], None);
        assert_eq!(read[2], Some(task("t1", "queued", &["a"])));
        assert_eq!(tasks.len().unwrap(), 2);
        assert!(tasks.contains("t1").unwrap());
        assert!(!tasks.contains("t9").unwrap());
    }

    #[test]
    fn test_insert_conflict_commits_nothing() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "queued", &[])]).unwrap();

        let err = tasks.insert(&[task("t2", "queued", &[]), task("t1", "done", &[])]).unwrap_err();
        assert!(matches!(err, BucketError::KeyConflict { ref key } if key == "t1"), "{err}");

        assert!(!tasks.contains("t2").unwrap());
        let lookup = tasks.read_index("status", &["queued", "done"]).unwrap();
        assert_eq!(lookup[b"queued".as_slice()], keys(&["t1"]));
        assert!(lookup[b"done".as_slice()].is_empty());
    }

    #[test]
    fn test_insert_duplicate_within_batch_conflicts() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);

        let err = tasks.insert(&[task("t1", "a", &[]), task("t1", "b", &[])]).unwrap_err();
        assert!(matches!(err, BucketError::KeyConflict { .. }));
        assert!(tasks.is_empty().unwrap());
    }

    #[test]
    fn test_insert_rejects_empty_key() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);

        let err = tasks.insert(&[task("", "queued", &[])]).unwrap_err();
        assert!(matches!(err, BucketError::InvalidKey { .. }));
    }

    #[test]
    fn test_multi_valued_index() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks
            .insert(&[task("t1", "q", &["red", "blue"]), task("t2", "q", &["blue", "blue"])])
            .unwrap();

        let lookup = tasks.read_index("tags", &["blue", "red", "green"]).unwrap();
        assert_eq!(lookup[b"blue".as_slice()], keys(&["t1", "t2"]));
        assert_eq!(lookup[b"red".as_slice()], keys(&["t1"]));
        assert!(lookup[b"green".as_slice()].is_empty());
    }

    #[test]
    fn test_update_refiles_only_changed_entries() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "queued", &["a", "b"]), task("t2", "queued", &[])]).unwrap();

        // The caller's copy is stale; the mutator sees the stored one.
        let stale = task("t1", "ignored", &[]);
        tasks
            .update(&[stale], |_txn, records| {
                assert_eq!(records[0].status, "queued");
                records[0].status = "running".to_string();
                records[0].tags = vec!["b".to_string(), "c".to_string()];
                Ok::<_, MutatorError>(())
            })
            .unwrap();

        let status = tasks.read_index("status", &["queued", "running"]).unwrap();
        assert_eq!(status[b"queued".as_slice()], keys(&["t2"]));
        assert_eq!(status[b"running".as_slice()], keys(&["t1"]));

        let tags = tasks.read_index("tags", &["a", "b", "c"]).unwrap();
        assert!(tags[b"a".as_slice()].is_empty());
        assert_eq!(tags[b"b".as_slice()], keys(&["t1"]));
        assert_eq!(tags[b"c".as_slice()], keys(&["t1"]));
        assert!(tasks.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_update_unknown_key() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);

        let err = tasks
            .update(&[task("nope", "x", &[])], |_, _| Ok::<_, MutatorError>(()))
            .unwrap_err();
        assert!(matches!(err, BucketError::UnknownKey { ref key } if key == "nope"));
    }

    #[test]
    fn test_update_duplicate_key() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "q", &[])]).unwrap();

        let t = task("t1", "q", &[]);
        let err = tasks.update(&[t.clone(), t], |_, _| Ok::<_, MutatorError>(())).unwrap_err();
        assert!(matches!(err, BucketError::DuplicateKey { .. }));
    }

    #[test]
    fn test_update_mutator_error_leaves_no_trace() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "queued", &[])]).unwrap();
        let raw_before = tasks.read_raw("t1").unwrap();

        let err = tasks
            .update(&[task("t1", "", &[])], |_, records| {
                records[0].status = "running".to_string();
                Err("quota exhausted")
            })
            .unwrap_err();
        assert!(matches!(err, BucketError::Mutator { .. }));
        assert_eq!(err.to_string(), "Mutator failed: quota exhausted");

        assert_eq!(tasks.read_raw("t1").unwrap(), raw_before);
        let status = tasks.read_index("status", &["queued", "running"]).unwrap();
        assert_eq!(status[b"queued".as_slice()], keys(&["t1"]));
        assert!(status[b"running".as_slice()].is_empty());
    }

    #[test]
    fn test_update_rejects_key_change() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "q", &[])]).unwrap();

        let err = tasks
            .update(&[task("t1", "q", &[])], |_, records| {
                records[0].id = "t2".to_string();
                Ok::<_, MutatorError>(())
            })
            .unwrap_err();
        assert!(matches!(err, BucketError::KeyMutated { .. }));
        assert!(tasks.contains("t1").unwrap());
        assert!(!tasks.contains("t2").unwrap());
    }

    #[test]
    fn test_update_mutator_may_reorder_records() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("c", "q", &[]), task("a", "q", &[])]).unwrap();

        tasks
            .update(&[task("c", "", &[]), task("a", "", &[])], |_, records| {
                records.sort_by(|x, y| x.id.cmp(&y.id));
                records[0].status = "first".to_string();
                Ok::<_, MutatorError>(())
            })
            .unwrap();

        let read = tasks.read(&["a", "c"]).unwrap();
        assert_eq!(read[0], Some(task("a", "first", &[])));
        assert_eq!(read[1], Some(task("c", "q", &[])));
        let status = tasks.read_index("status", &["first", "q"]).unwrap();
        assert_eq!(status[b"first".as_slice()], keys(&["a"]));
        assert_eq!(status[b"q".as_slice()], keys(&["c"]));
        assert!(tasks.verify().unwrap().is_consistent());

        let err = tasks
            .update(&[task("c", "", &[]), task("a", "", &[])], |_, records| {
                records[1].id = records[0].id.clone();
                Ok::<_, MutatorError>(())
            })
            .unwrap_err();
        assert!(matches!(err, BucketError::KeyMutated { .. }), "{err}");
    }

    #[test]
    fn test_insert_cancelled_before_commit() {
        let engine = StorageEngine::in_memory().unwrap();
        let bucket = open_cancelling(&engine);
        let token = CancellationToken::new();

        CANCEL_WHILE_INDEXING.set(Some(token.clone()));
        let err = bucket.insert_with(&[Cancelling::new("k1")], Some(&token)).unwrap_err();
        CANCEL_WHILE_INDEXING.set(None);

        assert!(matches!(err, BucketError::Cancelled), "{err}");
        assert!(bucket.is_empty().unwrap());
        assert!(bucket.read_index("value", &["v"]).unwrap()[b"v".as_slice()].is_empty());
    }

    #[test]
    fn test_delete_cancelled_before_commit() {
        let engine = StorageEngine::in_memory().unwrap();
        let bucket = open_cancelling(&engine);
        bucket.insert(&[Cancelling::new("k1")]).unwrap();
        let token = CancellationToken::new();

        CANCEL_WHILE_INDEXING.set(Some(token.clone()));
        let err = bucket.delete_with(&["k1"], Some(&token)).unwrap_err();
        CANCEL_WHILE_INDEXING.set(None);

        assert!(matches!(err, BucketError::Cancelled), "{err}");
        assert!(bucket.contains("k1").unwrap());
        assert_eq!(bucket.read_index("value", &["v"]).unwrap()[b"v".as_slice()], keys(&["k1"]));
    }

    #[test]
    fn test_update_mutator_reads_through_transaction() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "q", &[]), task("t2", "blocked", &[])]).unwrap();

        tasks
            .update(&[task("t1", "", &[])], |txn, records| -> Result<(), MutatorError> {
                let primary = txn.open_table(primary_table("tasks"))?;
                let other = primary.get(b"t2".as_slice())?.ok_or("t2 missing")?;
                let other: Task = serde_json::from_slice(other.value())?;
                records[0].status = format!("after-{}", other.status);
                Ok(())
            })
            .unwrap();

        let read = tasks.read(&["t1"]).unwrap();
        assert_eq!(read[0].as_ref().unwrap().status, "after-blocked");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "q", &["x"]), task("t2", "q", &["x"])]).unwrap();

        tasks.delete(&["t1", "missing"]).unwrap();
        tasks.delete(&["t1"]).unwrap();

        assert_eq!(tasks.read_raw("t1").unwrap(), None);
        assert_eq!(tasks.read_index("tags", &["x"]).unwrap()[b"x".as_slice()], keys(&["t2"]));
        assert!(tasks.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_list_pagination() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks
            .insert(&[task("c", "q", &[]), task("a", "q", &[]), task("b", "q", &[])])
            .unwrap();

        let (all, total) = tasks.list(0, None).unwrap();
        assert_eq!(total, 3);
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let (page, total) = tasks.list(1, Some(1)).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page, vec![task("b", "q", &[])]);

        let (past_end, total) = tasks.list(10, Some(5)).unwrap();
        assert!(past_end.is_empty());
        assert_eq!(total, 3);

        let mut walked = Vec::new();
        for offset in 0..3 {
            let (page, _) = tasks.list(offset, Some(1)).unwrap();
            walked.extend(page);
        }
        assert_eq!(walked, all);

        let token = CancellationToken::new();
        token.cancel();
        let err = tasks.list_with(2, None, Some(&token)).unwrap_err();
        assert!(matches!(err, BucketError::Cancelled));
    }

    #[test]
    fn test_read_index_unknown_and_missing() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);

        let err = tasks.read_index("owner", &["x"]).unwrap_err();
        assert!(matches!(err, BucketError::UnknownIndex { .. }));

        let db = engine.db();
        let txn = db.begin_write().unwrap();
        txn.delete_table(index_table("status")).unwrap();
        txn.commit().unwrap();

        let err = tasks.read_index("status", &["x"]).unwrap_err();
        assert!(matches!(err, BucketError::MissingIndex { ref index } if index == "status"));

        let err = tasks.insert(&[task("t1", "q", &[])]).unwrap_err();
        assert!(matches!(err, BucketError::MissingIndex { .. }));

        let report = tasks.verify().unwrap();
        assert!(report.indices[0].table_missing);

        tasks.reindex().unwrap();
        assert!(tasks.read_index("status", &["x"]).unwrap()[b"x".as_slice()].is_empty());
        assert!(tasks.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_verify_reports_stale_entries_and_reindex_repairs() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        tasks.insert(&[task("t1", "q", &["x"])]).unwrap();

        let db = engine.db();
        let txn = db.begin_write().unwrap();
        {
            let mut tags = txn.open_table(index_table("tags")).unwrap();
            tags.remove(crate::keys::encode_index_key(b"x", b"t1").unwrap().as_slice()).unwrap();
            tags.insert(crate::keys::encode_index_key(b"y", b"ghost").unwrap().as_slice(), ())
                .unwrap();
        }
        txn.commit().unwrap();

        let report = tasks.verify().unwrap();
        assert_eq!(report.records, 1);
        assert!(report.indices[0].is_consistent());
        let tags = &report.indices[1];
        assert_eq!(tags.missing.len(), 1);
        assert_eq!(tags.missing[0].record_key, b"t1");
        assert_eq!(tags.orphaned.len(), 1);

        tasks.reindex().unwrap();
        assert!(tasks.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_reopen_persists_metadata() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        assert_eq!(tasks.reconciliation().previous, None);
        drop(tasks);

        let reopened = open_tasks(&engine);
        assert_eq!(
            reopened.reconciliation().previous,
            Some(vec!["status".to_string(), "tags".to_string()])
        );

        let db = engine.db();
        let txn = db.begin_read().unwrap();
        let meta = txn.open_table(meta_table("tasks_meta")).unwrap();
        assert!(meta.get(crate::tables::META_INDICES_KEY).unwrap().is_some());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let engine = StorageEngine::in_memory().unwrap();
        let config =
            IndexedBucketConfig { name: "tasks".to_string(), indices: vec!["tasks".to_string()] };
        let err =
            IndexedBucket::<Task, _>::open(engine.db(), config, JsonCodec::new()).unwrap_err();
        assert!(matches!(err, BucketError::Config { .. }));
    }

    #[test]
    fn test_postcard_codec_bucket() {
        let engine = StorageEngine::in_memory().unwrap();
        let config = IndexedBucketConfig::builder()
            .name("binary")
            .indices(vec!["status".to_string()])
            .build()
            .unwrap();
        let bucket =
            IndexedBucket::open(engine.db(), config, PostcardCodec::<Task>::new()).unwrap();

        bucket.insert(&[task("t1", "q", &[])]).unwrap();
        assert_eq!(bucket.read(&["t1"]).unwrap()[0], Some(task("t1", "q", &[])));
        assert_eq!(bucket.read_index("status", &["q"]).unwrap()[b"q".as_slice()], keys(&["t1"]));
    }

    #[test]
    fn test_clone_shares_state() {
        let engine = StorageEngine::in_memory().unwrap();
        let tasks = open_tasks(&engine);
        let other = tasks.clone();

        tasks.insert(&[task("t1", "q", &[])]).unwrap();
        assert!(other.contains("t1").unwrap());
        assert_eq!(
            format!("{other:?}"),
            r#"IndexedBucket { name: "tasks", indices: ["status", "tags"], .. }"#
        );
    }
}

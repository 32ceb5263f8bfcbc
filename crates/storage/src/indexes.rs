//! Secondary index maintenance.
//!
//! An index table holds one composite key per `(value, record key)` pair and
//! no payload. Lookups are prefix scans over the encoded value; maintenance is
//! set arithmetic over the composite keys a record contributes.

use std::collections::{BTreeSet, HashSet};

use redb::{ReadableTable, Table, TableHandle, WriteTransaction};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::error::{
    CodecSnafu, CorruptedSnafu, MissingIndexSnafu, Result, StorageSnafu, TableSnafu, display_key,
    ensure_not_cancelled,
};
use crate::keys::{encode_index_key, encode_index_prefix};
use crate::record::Record;
use crate::tables::{index_table, primary_table};

/// Composite keys contributed to one index, in table order.
pub(crate) type EntrySet = BTreeSet<Vec<u8>>;

/// Writable handle to an index table.
pub(crate) type IndexWriter<'txn> = Table<'txn, &'static [u8], ()>;

/// Composite keys `record` contributes to `index`.
pub(crate) fn record_entries<R: Record>(record: &R, index: &str) -> Result<EntrySet> {
    let key = record.key();
    record.index_values(index).iter().map(|value| encode_index_key(value, key)).collect()
}

/// Adds the entries of `record` for `index` to an accumulated set.
pub(crate) fn collect_entries<R: Record>(
    record: &R,
    index: &str,
    entries: &mut EntrySet,
) -> Result<()> {
    entries.extend(record_entries(record, index)?);
    Ok(())
}

/// Record keys filed under exactly `value`, in ascending key order.
pub(crate) fn scan_index<T>(table: &T, value: &[u8]) -> Result<Vec<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], ()>,
{
    let prefix = encode_index_prefix(value)?;
    let mut keys = Vec::new();

    for entry in table.range(prefix.as_slice()..).context(StorageSnafu)? {
        let (composite, _) = entry.context(StorageSnafu)?;
        let composite = composite.value();
        if !composite.starts_with(&prefix) {
            break;
        }
        keys.push(composite[prefix.len()..].to_vec());
    }

    Ok(keys)
}

/// Inserts composite keys into an index table. Returns how many were written.
pub(crate) fn insert_entries<'a>(
    table: &mut IndexWriter<'_>,
    entries: impl IntoIterator<Item = &'a Vec<u8>>,
) -> Result<usize> {
    let mut written = 0;
    for entry in entries {
        table.insert(entry.as_slice(), ()).context(StorageSnafu)?;
        written += 1;
    }
    Ok(written)
}

/// Removes composite keys from an index table. Returns how many were removed.
pub(crate) fn remove_entries<'a>(
    table: &mut IndexWriter<'_>,
    entries: impl IntoIterator<Item = &'a Vec<u8>>,
) -> Result<usize> {
    let mut removed = 0;
    for entry in entries {
        if table.remove(entry.as_slice()).context(StorageSnafu)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Names of every table in the transaction.
pub(crate) fn existing_tables(txn: &WriteTransaction) -> Result<HashSet<String>> {
    let tables = txn.list_tables().context(StorageSnafu)?;
    Ok(tables.map(|table| table.name().to_string()).collect())
}

/// Opens the tables of every active index for writing.
///
/// Fails with `MissingIndex` instead of creating a table that has gone
/// missing since open: an empty replacement would silently hide records.
pub(crate) fn open_index_writers<'txn>(
    txn: &'txn WriteTransaction,
    indices: &[String],
) -> Result<Vec<IndexWriter<'txn>>> {
    let existing = existing_tables(txn)?;
    indices
        .iter()
        .map(|index| {
            ensure!(existing.contains(index), MissingIndexSnafu { index: index.as_str() });
            txn.open_table(index_table(index)).context(TableSnafu)
        })
        .collect()
}

/// Drops and refills the given index tables from the primary table.
///
/// Runs inside the caller's write transaction, so a failure part-way leaves
/// the previous index state intact once the transaction is dropped. Returns
/// the number of records scanned.
pub(crate) fn rebuild_indices<R, C>(
    txn: &WriteTransaction,
    primary: &str,
    indices: &[String],
    codec: &C,
    cancel: Option<&CancellationToken>,
) -> Result<u64>
where
    R: Record,
    C: Codec<R>,
{
    for index in indices {
        txn.delete_table(index_table(index)).context(TableSnafu)?;
    }

    let source = txn.open_table(primary_table(primary)).context(TableSnafu)?;
    let mut targets = indices
        .iter()
        .map(|index| txn.open_table(index_table(index)).context(TableSnafu))
        .collect::<Result<Vec<_>>>()?;

    let mut records = 0u64;
    for entry in source.iter().context(StorageSnafu)? {
        ensure_not_cancelled(cancel)?;

        let (key, bytes) = entry.context(StorageSnafu)?;
        let record = codec.decode(bytes.value()).context(CodecSnafu)?;
        ensure!(
            record.key() == key.value(),
            CorruptedSnafu {
                reason: format!(
                    "record stored under {} reports key {}",
                    display_key(key.value()),
                    display_key(record.key())
                ),
            }
        );

        for (index, table) in indices.iter().zip(targets.iter_mut()) {
            insert_entries(table, &record_entries(&record, index)?)?;
        }
        records += 1;
    }

    Ok(records)
}

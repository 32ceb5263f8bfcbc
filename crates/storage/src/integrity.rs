//! Index integrity scrub.
//!
//! Recomputes the index entries every stored record should contribute and
//! compares them with what the index tables actually hold. The scrub only
//! reads; repairs go through `reindex`.

use std::collections::BTreeMap;

use redb::{ReadTransaction, ReadableTable, TableError};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::error::{CodecSnafu, Result, StorageSnafu, TableSnafu, ensure_not_cancelled};
use crate::indexes::{EntrySet, collect_entries};
use crate::keys::decode_index_key;
use crate::record::Record;
use crate::tables::{index_table, primary_table};

/// A decoded `(value, record key)` index entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    /// The index value.
    pub value: Vec<u8>,
    /// The record key filed under `value`.
    pub record_key: Vec<u8>,
}

/// Findings for a single index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexIntegrity {
    /// Index name.
    pub index: String,
    /// The index table does not exist.
    pub table_missing: bool,
    /// Entries that stored records imply but the table lacks.
    pub missing: Vec<IndexEntry>,
    /// Raw composite keys present in the table that no stored record implies.
    pub orphaned: Vec<Vec<u8>>,
}

impl IndexIntegrity {
    /// Whether this index matches the primary table exactly.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.table_missing && self.missing.is_empty() && self.orphaned.is_empty()
    }
}

/// Result of [`IndexedBucket::verify`](crate::IndexedBucket::verify).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Records scanned in the primary table.
    pub records: u64,
    /// Per-index findings, in configuration order.
    pub indices: Vec<IndexIntegrity>,
}

impl IntegrityReport {
    /// Whether every active index matches the primary table.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.indices.iter().all(IndexIntegrity::is_consistent)
    }

    /// Total number of missing and orphaned entries plus missing tables.
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.indices
            .iter()
            .map(|i| i.missing.len() + i.orphaned.len() + usize::from(i.table_missing))
            .sum()
    }
}

pub(crate) fn scan<R, C>(
    txn: &ReadTransaction,
    primary: &str,
    indices: &[String],
    codec: &C,
    cancel: Option<&CancellationToken>,
) -> Result<IntegrityReport>
where
    R: Record,
    C: Codec<R>,
{
    let mut expected: BTreeMap<&str, EntrySet> =
        indices.iter().map(|index| (index.as_str(), EntrySet::new())).collect();

    let source = txn.open_table(primary_table(primary)).context(TableSnafu)?;
    let mut records = 0u64;
    for entry in source.iter().context(StorageSnafu)? {
        ensure_not_cancelled(cancel)?;
        let (_, bytes) = entry.context(StorageSnafu)?;
        let record = codec.decode(bytes.value()).context(CodecSnafu)?;
        for (index, entries) in &mut expected {
            collect_entries(&record, index, entries)?;
        }
        records += 1;
    }

    let mut findings = Vec::with_capacity(indices.len());
    for index in indices {
        let mut expected_entries = expected.remove(index.as_str()).unwrap_or_default();
        let mut finding = IndexIntegrity { index: index.clone(), ..IndexIntegrity::default() };

        let table = match txn.open_table(index_table(index)) {
            Ok(table) => Some(table),
            Err(TableError::TableDoesNotExist(_)) => None,
            Err(source) => return Err(source).context(TableSnafu),
        };

        match table {
            None => finding.table_missing = true,
            Some(table) => {
                for entry in table.iter().context(StorageSnafu)? {
                    ensure_not_cancelled(cancel)?;
                    let (composite, _) = entry.context(StorageSnafu)?;
                    let composite = composite.value();
                    if !expected_entries.remove(composite) {
                        finding.orphaned.push(composite.to_vec());
                    }
                }
            },
        }

        finding.missing = expected_entries
            .iter()
            .filter_map(|composite| decode_index_key(composite))
            .map(|(value, record_key)| IndexEntry {
                value: value.to_vec(),
                record_key: record_key.to_vec(),
            })
            .collect();
        findings.push(finding);
    }

    Ok(IntegrityReport { records, indices: findings })
}

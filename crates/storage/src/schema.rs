//! Open-time schema reconciliation.
//!
//! Compares the configured index set against the descriptor persisted by the
//! previous open, creates and fills index tables that are new or missing, and
//! records the active set. Orphaned tables of removed indices stay on disk.

use redb::{Database, ReadableTable};
use snafu::ResultExt;
use tracing::{info, warn};

use cairn_types::IndexedBucketConfig;

use crate::codec::Codec;
use crate::error::{CommitSnafu, Result, StorageSnafu, TableSnafu, TransactionSnafu};
use crate::indexes::{existing_tables, rebuild_indices};
use crate::record::Record;
use crate::tables::{IndexMetadata, META_INDICES_KEY, meta_table, primary_table};

/// Outcome of reconciling a bucket's index set at open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Index names recorded by the previous open, if any.
    pub previous: Option<Vec<String>>,
    /// Indices that were rebuilt from the primary table.
    pub rebuilt: Vec<String>,
    /// Indices dropped from the configuration whose tables remain on disk.
    pub orphaned: Vec<String>,
    /// Records scanned while rebuilding.
    pub records_scanned: u64,
}

/// Brings the on-disk layout of a bucket in line with its configuration.
///
/// Runs in a single write transaction: either the whole reconciliation is
/// committed or nothing is.
pub(crate) fn reconcile<R, C>(
    db: &Database,
    config: &IndexedBucketConfig,
    codec: &C,
) -> Result<Reconciliation>
where
    R: Record,
    C: Codec<R>,
{
    let meta_name = config.meta_bucket_name();
    let txn = db.begin_write().context(TransactionSnafu)?;

    txn.open_table(primary_table(&config.name)).context(TableSnafu)?;

    let previous = {
        let meta = txn.open_table(meta_table(&meta_name)).context(TableSnafu)?;
        let stored = meta.get(META_INDICES_KEY).context(StorageSnafu)?.map(|v| v.value().to_vec());
        stored.map(|bytes| IndexMetadata::from_bytes(&bytes)).transpose()?
    };

    let existing = existing_tables(&txn)?;
    let rebuild: Vec<String> = config
        .indices
        .iter()
        .filter(|index| {
            let known = previous.as_ref().is_some_and(|m| m.indices.contains(*index));
            !known || !existing.contains(index.as_str())
        })
        .cloned()
        .collect();

    let orphaned: Vec<String> = previous
        .as_ref()
        .map(|m| m.indices.iter().filter(|i| !config.indices.contains(*i)).cloned().collect())
        .unwrap_or_default();

    if !orphaned.is_empty() {
        warn!(
            bucket = %config.name,
            orphaned = ?orphaned,
            "Indices removed from configuration; their tables are left in place"
        );
    }

    let records_scanned = if rebuild.is_empty() {
        0
    } else {
        let scanned = rebuild_indices(&txn, &config.name, &rebuild, codec, None)?;
        info!(
            bucket = %config.name,
            rebuilt = ?rebuild,
            records = scanned,
            "Built new or missing indices"
        );
        scanned
    };

    {
        let metadata = IndexMetadata::new(config.indices.clone());
        let bytes = metadata.to_bytes()?;
        let mut meta = txn.open_table(meta_table(&meta_name)).context(TableSnafu)?;
        meta.insert(META_INDICES_KEY, bytes.as_slice()).context(StorageSnafu)?;
    }

    txn.commit().context(CommitSnafu)?;

    Ok(Reconciliation {
        previous: previous.map(|m| m.indices),
        rebuilt: rebuild,
        orphaned,
        records_scanned,
    })
}

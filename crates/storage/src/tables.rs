//! Table layout for indexed buckets.
//!
//! Every indexed bucket occupies a family of redb tables:
//! - `<name>`: primary records, key → encoded record
//! - one table per active index, named after the index: composite key → `()`
//! - `<name>_meta`: the [`IndexMetadata`] descriptor under [`META_INDICES_KEY`]
//!
//! Composite key encoding lives in the keys module.

use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{CodecSnafu, CorruptedSnafu, Result};

/// Primary table: record key → encoded record.
pub(crate) type PrimaryTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

/// Index table: composite key → nothing.
pub(crate) type IndexTable<'a> = TableDefinition<'a, &'static [u8], ()>;

/// Metadata table: descriptor name → encoded descriptor.
pub(crate) type MetaTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

/// Key of the active-index descriptor inside the metadata table.
pub const META_INDICES_KEY: &str = "indices";

/// Current [`IndexMetadata`] format version.
pub const METADATA_FORMAT_VERSION: u16 = 1;

pub(crate) fn primary_table(name: &str) -> PrimaryTable<'_> {
    TableDefinition::new(name)
}

pub(crate) fn index_table(name: &str) -> IndexTable<'_> {
    TableDefinition::new(name)
}

pub(crate) fn meta_table(name: &str) -> MetaTable<'_> {
    TableDefinition::new(name)
}

/// Persisted set of index names materialized by the last successful open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Layout version of this descriptor.
    pub format_version: u16,
    /// Index names, in configuration order.
    pub indices: Vec<String>,
}

impl IndexMetadata {
    /// Creates a descriptor for the given index names at the current format version.
    #[must_use]
    pub fn new(indices: Vec<String>) -> Self {
        Self { format_version: METADATA_FORMAT_VERSION, indices }
    }

    /// Serializes the descriptor with postcard.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Codec`](crate::BucketError::Codec) if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cairn_types::codec::encode(self).context(CodecSnafu)
    }

    /// Deserializes and version-checks a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Codec`](crate::BucketError::Codec) for malformed
    /// bytes and [`BucketError::Corrupted`](crate::BucketError::Corrupted) for
    /// an unknown format version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = cairn_types::codec::decode(bytes).context(CodecSnafu)?;
        ensure!(
            metadata.format_version == METADATA_FORMAT_VERSION,
            CorruptedSnafu {
                reason: format!(
                    "unsupported index metadata version {} (expected {METADATA_FORMAT_VERSION})",
                    metadata.format_version
                ),
            }
        );
        Ok(metadata)
    }
}

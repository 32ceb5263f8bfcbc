//! Indexed buckets for Cairn.
//!
//! This crate provides:
//! - redb-based persistent storage ([`StorageEngine`])
//! - The [`Record`] and [`Codec`] contracts
//! - [`IndexedBucket`]: records plus secondary indices kept consistent in
//!   single transactions, with schema reconciliation at open
//! - Prefix-safe composite index keys
//! - Integrity scrubbing and an async facade with cancellation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod async_bucket;
mod bucket;
mod codec;
mod engine;
mod error;
mod indexes;
mod integrity;
pub mod keys;
mod record;
mod schema;
pub mod tables;

pub use async_bucket::AsyncIndexedBucket;
pub use bucket::{IndexLookup, IndexedBucket};
pub use codec::{Codec, JsonCodec, PostcardCodec};
pub use engine::{EngineError, StorageEngine};
pub use error::{BucketError, MutatorError, Result};
pub use integrity::{IndexEntry, IndexIntegrity, IntegrityReport};
pub use record::Record;
pub use schema::Reconciliation;
pub use tables::IndexMetadata;

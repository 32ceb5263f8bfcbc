//! Shared types for Cairn.
//!
//! This crate provides the foundational pieces used throughout the workspace:
//! - Machine-readable error codes
//! - postcard and JSON codec helpers with snafu errors
//! - Validated configuration for the storage engine and indexed buckets

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;

pub use codec::CodecError;
pub use config::{ConfigError, EngineConfig, IndexedBucketConfig};
pub use error::ErrorCode;

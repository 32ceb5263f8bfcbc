//! Centralized serialization and deserialization functions.
//!
//! Two wire formats are available: compact postcard for internal metadata and
//! records that never leave the process, and JSON for records that should stay
//! human-readable on disk. Both report failures through [`CodecError`].

use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Postcard encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Postcard decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// JSON encoding failed.
    #[snafu(display("JSON encoding failed: {source}"))]
    JsonEncode {
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// JSON decoding failed.
    #[snafu(display("JSON decoding failed: {source}"))]
    JsonDecode {
        /// The underlying serde_json error.
        source: serde_json::Error,
    },
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

/// Encodes a value to JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::JsonEncode` if serialization fails.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|source| CodecError::JsonEncode { source })
}

/// Decodes JSON bytes to a value.
///
/// # Errors
///
/// Returns `CodecError::JsonDecode` if deserialization fails.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::JsonDecode { source })
}

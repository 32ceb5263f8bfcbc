//! Record codecs.
//!
//! A [`Codec`] turns a record into the bytes stored in the primary bucket and
//! back. Round-trip equality is required; byte-level determinism is not.

use std::fmt;
use std::marker::PhantomData;

use cairn_types::CodecError;
use cairn_types::codec::{decode, decode_json, encode, encode_json};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Converts records of type `R` to and from their stored byte form.
pub trait Codec<R> {
    /// Encodes a record.
    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError>;

    /// Decodes a record previously produced by [`Codec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<R, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Stored values stay human-readable, which helps when inspecting a store
/// with external tooling.
pub struct JsonCodec<R> {
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonCodec<R> {
    /// Creates a JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self { _record: PhantomData }
    }
}

impl<R> Default for JsonCodec<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for JsonCodec<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for JsonCodec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<R> Codec<R> for JsonCodec<R>
where
    R: Serialize + DeserializeOwned,
{
    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError> {
        encode_json(record)
    }

    fn decode(&self, bytes: &[u8]) -> Result<R, CodecError> {
        decode_json(bytes)
    }
}

/// Compact binary codec backed by `postcard`.
pub struct PostcardCodec<R> {
    _record: PhantomData<fn() -> R>,
}

impl<R> PostcardCodec<R> {
    /// Creates a postcard codec.
    #[must_use]
    pub const fn new() -> Self {
        Self { _record: PhantomData }
    }
}

impl<R> Default for PostcardCodec<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for PostcardCodec<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for PostcardCodec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PostcardCodec")
    }
}

impl<R> Codec<R> for PostcardCodec<R>
where
    R: Serialize + DeserializeOwned,
{
    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError> {
        encode(record)
    }

    fn decode(&self, bytes: &[u8]) -> Result<R, CodecError> {
        decode(bytes)
    }
}

//! Fuzz target for composite index key decoding.
//!
//! `decode_index_key` must never panic, and any key it accepts must re-encode
//! to exactly the input bytes and be matched by its own lookup prefix.

#![no_main]

use libfuzzer_sys::fuzz_target;

use cairn_storage::keys::{decode_index_key, encode_index_key, encode_index_prefix};

fuzz_target!(|data: &[u8]| {
    let Some((value, record_key)) = decode_index_key(data) else {
        return;
    };

    let encoded = encode_index_key(value, record_key).expect("decoded value fits the prefix");
    assert_eq!(encoded, data, "composite key roundtrip mismatch");

    let prefix = encode_index_prefix(value).expect("decoded value fits the prefix");
    assert!(data.starts_with(&prefix), "key not matched by its own prefix");
    assert_eq!(&data[prefix.len()..], record_key, "record key is not the suffix after the prefix");
});

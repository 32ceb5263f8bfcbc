//! Fuzz target for index metadata decoding.
//!
//! Arbitrary bytes in the metadata table must produce an error, never a
//! panic, and accepted descriptors must survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;

use cairn_storage::IndexMetadata;

fuzz_target!(|data: &[u8]| {
    if let Ok(metadata) = IndexMetadata::from_bytes(data) {
        let bytes = metadata.to_bytes().expect("decoded metadata re-encodes");
        let again = IndexMetadata::from_bytes(&bytes).expect("re-encoded metadata decodes");
        assert_eq!(again, metadata, "metadata roundtrip mismatch");
    }
});

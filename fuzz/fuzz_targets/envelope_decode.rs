//! Fuzzer for the signal body codecs.
//!
//! Two properties under arbitrary input:
//! - Decoders never panic: credentials and body kinds reject malformed
//!   bytes with structured errors, whatever the relay delivers.
//! - Positive space round-trips: any credential we can decode re-encodes
//!   to the exact same bytes, so a relay hop cannot silently mutate it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use weft_proto::{control, IceCredentials, SignalBody, SyncUpdate};

fuzz_target!(|data: &[u8]| {
    // Credential decoding must be total.
    if let Ok(credentials) = IceCredentials::decode(data) {
        let wire = credentials.encode();
        assert_eq!(&wire[..], data, "credential re-encoding diverged from input");

        let again = IceCredentials::decode(&wire).expect("re-decode of own encoding");
        assert_eq!(again, credentials);
    }

    // Body kind tags: every u8 either maps to a kind or is rejected.
    if let Some(first) = data.first() {
        let _ = SignalBody::decode(*first, data[1..].to_vec());
    }

    // Control-plane CBOR: arbitrary bytes must never panic the decoder.
    let _ = control::decode::<SyncUpdate>(data);
});

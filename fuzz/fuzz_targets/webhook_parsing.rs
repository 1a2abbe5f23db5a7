#![no_main]

//! Fuzz target for inbound payload parsing.
//!
//! Arbitrary bytes must parse into an event or a typed error without
//! panicking, and a parsed event must keep the exact bytes it was given.

use bytes::Bytes;
use chrono::Utc;
use libfuzzer_sys::fuzz_target;
use tollgate_core::InboundEvent;

fuzz_target!(|data: &[u8]| {
    let raw = Bytes::copy_from_slice(data);

    if let Ok(event) = InboundEvent::from_raw("atlas", raw.clone(), Utc::now()) {
        assert_eq!(event.raw_body, raw);
        assert!(event.payload.is_object());
        let _ = event.validate();
    }
});

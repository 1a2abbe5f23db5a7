#![no_main]

//! Fuzz target for webhook signature validation.
//!
//! Splits the input into a signature header value and a body. Verification
//! must never panic, and must only accept the signature it would generate.

use libfuzzer_sys::fuzz_target;
use tollgate_api::crypto::{generate_hmac_hex, verify_signature, SIGNATURE_PREFIX};

const SECRET: &str = "whsec_fuzz_secret";

fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let (header, body) = data.split_at(split);
    let body = body.get(1..).unwrap_or_default();

    let Ok(signature) = std::str::from_utf8(header) else {
        return;
    };

    let result = verify_signature(body, signature, SECRET);
    if result.is_valid {
        let expected = generate_hmac_hex(body, SECRET).unwrap();
        let provided = signature.trim();
        let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);
        assert_eq!(provided, expected);
    }

    let digest = generate_hmac_hex(body, SECRET).unwrap();
    assert!(verify_signature(body, &format!("{SIGNATURE_PREFIX}{digest}"), SECRET).is_valid);
});

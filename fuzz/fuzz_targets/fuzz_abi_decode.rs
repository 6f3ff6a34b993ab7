#![no_main]

use libfuzzer_sys::fuzz_target;
use ratls_whitelist::{decode_abi_string, decode_string_body};

fuzz_target!(|data: &[u8]| {
    let _ = decode_string_body(data);
    let _ = decode_abi_string(&hex::encode(data));

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_abi_string(text);
    }
});

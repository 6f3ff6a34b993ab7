#![no_main]

use libfuzzer_sys::fuzz_target;
use ratls_whitelist::Whitelist;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(whitelist) = Whitelist::decode(text) {
        let reencoded = Whitelist::decode(&whitelist.encode());
        assert_eq!(reencoded.ok(), Some(whitelist));
    }
});

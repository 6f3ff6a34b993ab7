//! Decoding of ABI-encoded dynamic strings returned by `eth_call`.
//!
//! The response is untrusted. Every offset and length is bounds-checked and
//! every failure is reported as an [`AbiError`]; decoding never panics.

use crate::AbiError;

/// ABI word size in bytes.
pub const WORD: usize = 32;

/// Length of a function selector.
const SELECTOR_LEN: usize = 4;

/// Significant bytes of a word once its high bytes are required to be zero.
const USIZE_TAIL: usize = 8;

/// Decodes the hex-encoded ABI return value of a function returning
/// `string`.
///
/// A `0x` prefix is optional. When the decoded length is four bytes longer
/// than a whole number of words, the leading four bytes are treated as an
/// echoed selector and skipped.
pub fn decode_abi_string(hex_text: &str) -> Result<String, AbiError> {
    let trimmed = hex_text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !digits.len().is_multiple_of(2) {
        return Err(AbiError::OddLength {
            length: digits.len(),
        });
    }
    let raw = hex::decode(digits).map_err(|source| AbiError::InvalidHex { source })?;
    let selector_echoed = raw
        .len()
        .checked_sub(SELECTOR_LEN)
        .is_some_and(|rest| rest.is_multiple_of(WORD));
    let body = if selector_echoed {
        raw.get(SELECTOR_LEN..).unwrap_or_default()
    } else {
        raw.as_slice()
    };
    decode_string_body(body)
}

/// Decodes an ABI `string` return value from raw bytes without a selector.
pub fn decode_string_body(body: &[u8]) -> Result<String, AbiError> {
    if body.is_empty() {
        return Err(AbiError::Empty);
    }
    let offset = read_word(body, 0)?;
    let length = read_word(body, offset)?;
    let start = offset
        .checked_add(WORD)
        .ok_or(AbiError::Overflow { value: offset })?;
    let end = start
        .checked_add(length)
        .ok_or(AbiError::Overflow { value: length })?;
    let bytes = body.get(start..end).ok_or(AbiError::OutOfBounds {
        position: end,
        available: body.len(),
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|source| AbiError::Utf8 { source })
}

/// Reads the 32-byte big-endian word at `position` as a `usize`.
fn read_word(body: &[u8], position: usize) -> Result<usize, AbiError> {
    let end = position
        .checked_add(WORD)
        .ok_or(AbiError::Overflow { value: position })?;
    let word = body.get(position..end).ok_or(AbiError::OutOfBounds {
        position: end,
        available: body.len(),
    })?;
    let (high, tail) = word.split_at(WORD - USIZE_TAIL);
    if high.iter().any(|byte| *byte != 0) {
        return Err(AbiError::WordTooLarge { position });
    }
    let value = tail
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte));
    usize::try_from(value).map_err(|_| AbiError::WordTooLarge { position })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn word(value: usize) -> String {
        format!("{value:064x}")
    }

    fn encode(text: &str) -> String {
        let mut data = hex::encode(text);
        while !data.len().is_multiple_of(64) {
            data.push('0');
        }
        format!("0x{}{}{}", word(32), word(text.len()), data)
    }

    #[test]
    fn decodes_standard_string_encoding() {
        let payload = r#"{"RATLS_WHITELIST_CONFIG":"YWE="}"#;
        assert_eq!(
            decode_abi_string(&encode(payload)).expect("decodes"),
            payload
        );
    }

    #[test]
    fn skips_echoed_selector() {
        let encoded = encode("hello");
        let with_selector = format!("0x062e2252{}", encoded.trim_start_matches("0x"));
        assert_eq!(decode_abi_string(&with_selector).expect("decodes"), "hello");
    }

    #[test]
    fn accepts_missing_prefix_and_empty_string() {
        let encoded = format!("{}{}", word(32), word(0));
        assert_eq!(decode_abi_string(&encoded).expect("decodes"), "");
    }

    #[rstest]
    #[case::empty("0x")]
    #[case::odd("0x123")]
    #[case::not_hex("0xzz")]
    #[case::truncated_offset("0x0000")]
    fn rejects_malformed_input(#[case] input: &str) {
        assert!(decode_abi_string(input).is_err());
    }

    #[test]
    fn rejects_length_past_end() {
        let encoded = format!("0x{}{}{}", word(32), word(64), word(0));
        let error = decode_abi_string(&encoded).expect_err("must fail");
        assert!(matches!(error, AbiError::OutOfBounds { .. }));
    }

    #[test]
    fn rejects_huge_offset() {
        let encoded = format!("0x{}{}", "ff".repeat(32), word(0));
        let error = decode_abi_string(&encoded).expect_err("must fail");
        assert!(matches!(error, AbiError::WordTooLarge { .. }));
    }

    #[test]
    fn rejects_offset_that_overflows() {
        let encoded = format!("0x{}{}", word(usize::MAX), word(0));
        let error = decode_abi_string(&encoded).expect_err("must fail");
        assert!(matches!(error, AbiError::Overflow { .. }));
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(text) = decode_string_body(&bytes) {
                prop_assert!(text.len() <= bytes.len());
            }
            if let Ok(text) = decode_abi_string(&hex::encode(&bytes)) {
                prop_assert!(text.len() <= bytes.len());
            }
        }

        #[test]
        fn never_panics_on_arbitrary_text(text in ".{0,200}") {
            if let Ok(decoded) = decode_abi_string(&text) {
                prop_assert!(decoded.len() <= text.len());
            }
        }

        #[test]
        fn round_trips_printable_strings(text in "[ -~]{0,120}") {
            prop_assert_eq!(decode_abi_string(&encode(&text)).expect("decodes"), text);
        }
    }
}

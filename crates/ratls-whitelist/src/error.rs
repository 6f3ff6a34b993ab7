//! Error types for whitelist decoding and remote retrieval.

use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

/// Failures decoding the columnar whitelist form.
#[derive(Debug, Error)]
pub enum WhitelistError {
    /// The blob is not valid Base64.
    #[error("whitelist is not valid base64: {source}")]
    Base64 {
        /// Underlying decoder error.
        #[source]
        source: base64::DecodeError,
    },
    /// The decoded blob is not UTF-8 text.
    #[error("whitelist is not valid UTF-8: {source}")]
    Utf8 {
        /// Underlying conversion error.
        #[source]
        source: FromUtf8Error,
    },
    /// More than five non-empty lines.
    #[error("whitelist has {found} lines but rules have only five fields")]
    TooManyFields {
        /// Number of lines found.
        found: usize,
    },
    /// A field line has a different number of columns than the others.
    #[error("whitelist {field} line has {found} values, expected {expected}")]
    RaggedField {
        /// Field whose line is ragged.
        field: &'static str,
        /// Column count of the widest line.
        expected: usize,
        /// Column count of this line.
        found: usize,
    },
    /// A value cannot be written in the wire form.
    #[error("value '{value}' cannot be represented in a whitelist")]
    UnrepresentableValue {
        /// Rejected value.
        value: String,
    },
}

/// Failures decoding an ABI-encoded string.
#[derive(Debug, Error)]
pub enum AbiError {
    /// The response carried no data.
    #[error("ABI response is empty")]
    Empty,
    /// The hex text has an odd number of digits.
    #[error("ABI response has odd hex length {length}")]
    OddLength {
        /// Number of hex digits.
        length: usize,
    },
    /// The response is not hex.
    #[error("ABI response is not valid hex: {source}")]
    InvalidHex {
        /// Underlying decoder error.
        #[source]
        source: hex::FromHexError,
    },
    /// A read would run past the end of the data.
    #[error("ABI read ends at byte {position} but only {available} bytes are present")]
    OutOfBounds {
        /// Exclusive end of the attempted read.
        position: usize,
        /// Bytes available.
        available: usize,
    },
    /// Offset arithmetic overflowed.
    #[error("ABI offset arithmetic overflowed at {value}")]
    Overflow {
        /// Operand that overflowed.
        value: usize,
    },
    /// A word does not fit in a `usize`.
    #[error("ABI word at byte {position} is too large")]
    WordTooLarge {
        /// Offset of the word.
        position: usize,
    },
    /// The string payload is not UTF-8.
    #[error("ABI string is not valid UTF-8: {source}")]
    Utf8 {
        /// Underlying conversion error.
        #[source]
        source: FromUtf8Error,
    },
}

/// Failures obtaining the whitelist from the contract.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The HTTP client could not be built.
    #[error("failed to build RPC client: {source}")]
    Client {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The request failed in transport or timed out.
    #[error("RPC request failed: {source}")]
    Transport {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a non-success status.
    #[error("RPC endpoint returned HTTP status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The response body exceeded the size cap.
    #[error("RPC response exceeds {limit} bytes")]
    TooLarge {
        /// Cap in bytes.
        limit: u64,
    },
    /// Reading the response body failed.
    #[error("failed to read RPC response: {source}")]
    Read {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The response is not a JSON-RPC envelope.
    #[error("RPC response is not valid JSON-RPC: {source}")]
    Envelope {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The endpoint returned a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the endpoint.
        message: String,
    },
    /// The envelope had neither result nor error.
    #[error("RPC response has no result")]
    MissingResult,
    /// The call result could not be ABI-decoded.
    #[error(transparent)]
    Abi(#[from] AbiError),
    /// The decoded configuration is not a JSON object.
    #[error("contract configuration is not a JSON object: {source}")]
    ConfigJson {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The configuration lacks the whitelist field or it is not a string.
    #[error("contract configuration has no string field {field}")]
    MissingField {
        /// Expected field name.
        field: &'static str,
    },
    /// The whitelist blob could not be decoded.
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),
}

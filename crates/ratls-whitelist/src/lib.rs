//! Attestation whitelist handling for the RA-TLS launcher.
//!
//! A whitelist is an ordered, duplicate-free list of five-field rules
//! constraining which attested identities may connect. It travels as a
//! Base64 columnar blob in `RATLS_WHITELIST_CONFIG`. This crate decodes and
//! encodes that blob, merges a manifest whitelist with one read from a
//! contract, and performs the contract read itself: a JSON-RPC `eth_call`
//! whose ABI-encoded string result carries a JSON configuration object.

mod abi;
mod error;
mod remote;
mod rule;

pub use abi::{WORD, decode_abi_string, decode_string_body};
pub use error::{AbiError, RemoteError, WhitelistError};
pub use remote::{
    CONNECT_TIMEOUT, ContractReader, GET_SGX_CONFIG_SELECTOR, JsonRpcContractReader,
    MAX_RESPONSE_BYTES, REQUEST_TIMEOUT, WHITELIST_FIELD, eth_call_request,
    extract_whitelist_field, fetch_remote_whitelist, parse_rpc_response,
};
pub use rule::{ExactValue, FIELD_COUNT, RuleField, Whitelist, WhitelistRule};

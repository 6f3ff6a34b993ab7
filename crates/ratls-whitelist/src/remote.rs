//! Remote whitelist retrieval through a read-only contract call.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{RemoteError, Whitelist, decode_abi_string};

/// Selector of `getSGXConfig()`.
pub const GET_SGX_CONFIG_SELECTOR: &str = "0x062e2252";

/// JSON field holding the Base64 whitelist.
pub const WHITELIST_FIELD: &str = "RATLS_WHITELIST_CONFIG";

/// Connection establishment timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted response body.
pub const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

const REMOTE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::remote");

/// Executes read-only contract calls.
pub trait ContractReader {
    /// Calls `contract` with `calldata` at the latest block and returns the
    /// hex-encoded result.
    fn call(&self, contract: &str, calldata: &str) -> Result<String, RemoteError>;
}

/// [`ContractReader`] speaking JSON-RPC `eth_call` over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcContractReader {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl JsonRpcContractReader {
    /// Builds a reader for `endpoint` with the launcher's timeouts.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| RemoteError::Client { source })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint this reader targets.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Builds the JSON-RPC `eth_call` request body.
#[must_use]
pub fn eth_call_request(contract: &str, calldata: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_call",
        "params": [{ "to": contract, "data": calldata }, "latest"],
    })
}

/// Extracts the hex result from a JSON-RPC response body, surfacing error
/// objects.
pub fn parse_rpc_response(body: &[u8]) -> Result<String, RemoteError> {
    let envelope: RpcEnvelope =
        serde_json::from_slice(body).map_err(|source| RemoteError::Envelope { source })?;
    if let Some(error) = envelope.error {
        return Err(RemoteError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    envelope.result.ok_or(RemoteError::MissingResult)
}

impl ContractReader for JsonRpcContractReader {
    fn call(&self, contract: &str, calldata: &str) -> Result<String, RemoteError> {
        debug!(
            target: REMOTE_TARGET,
            endpoint = %self.endpoint,
            contract,
            calldata,
            "issuing eth_call"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&eth_call_request(contract, calldata))
            .send()
            .map_err(|source| RemoteError::Transport { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }
        if response
            .content_length()
            .is_some_and(|length| length > MAX_RESPONSE_BYTES)
        {
            return Err(RemoteError::TooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }

        let mut body = Vec::new();
        response
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_end(&mut body)
            .map_err(|source| RemoteError::Read { source })?;
        if !u64::try_from(body.len()).is_ok_and(|length| length <= MAX_RESPONSE_BYTES) {
            return Err(RemoteError::TooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }
        parse_rpc_response(&body)
    }
}

/// Extracts the Base64 whitelist from the contract's JSON configuration.
pub fn extract_whitelist_field(config_json: &str) -> Result<String, RemoteError> {
    let value: Value =
        serde_json::from_str(config_json).map_err(|source| RemoteError::ConfigJson { source })?;
    value
        .get(WHITELIST_FIELD)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(RemoteError::MissingField {
            field: WHITELIST_FIELD,
        })
}

/// Reads `getSGXConfig()` from `contract` and decodes its whitelist.
pub fn fetch_remote_whitelist(
    reader: &dyn ContractReader,
    contract: &str,
) -> Result<Whitelist, RemoteError> {
    let hex_result = reader.call(contract, GET_SGX_CONFIG_SELECTOR)?;
    let config_json = decode_abi_string(&hex_result)?;
    let blob = extract_whitelist_field(&config_json)?;
    let whitelist = Whitelist::decode(&blob)?;
    debug!(
        target: REMOTE_TARGET,
        contract,
        rules = whitelist.len(),
        "decoded remote whitelist"
    );
    Ok(whitelist)
}

#[cfg(test)]
mod tests {
    use mockall::mock;
    use mockall::predicate::eq;
    use rstest::rstest;

    use super::*;

    mock! {
        Reader {}
        impl ContractReader for Reader {
            fn call(&self, contract: &str, calldata: &str) -> Result<String, RemoteError>;
        }
    }

    fn abi_string(text: &str) -> String {
        let mut data = hex::encode(text);
        while !data.len().is_multiple_of(64) {
            data.push('0');
        }
        format!("0x{:064x}{:064x}{data}", 32, text.len())
    }

    fn reader_returning(result: Result<String, RemoteError>) -> MockReader {
        let mut reader = MockReader::new();
        reader
            .expect_call()
            .with(eq("0xcontract"), eq(GET_SGX_CONFIG_SELECTOR))
            .once()
            .return_once(move |_, _| result);
        reader
    }

    #[test]
    fn builds_eth_call_request() {
        let request = eth_call_request("0xabc", GET_SGX_CONFIG_SELECTOR);
        assert_eq!(request["method"], "eth_call");
        assert_eq!(request["params"][0]["to"], "0xabc");
        assert_eq!(request["params"][0]["data"], "0x062e2252");
        assert_eq!(request["params"][1], "latest");
    }

    #[test]
    fn surfaces_json_rpc_errors() {
        let error = parse_rpc_response(br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#)
            .expect_err("must fail");
        assert_eq!(error.to_string(), "RPC error -32000: execution reverted");
    }

    #[rstest]
    #[case::no_result(br#"{"jsonrpc":"2.0","id":1}"#.as_slice())]
    #[case::not_json(b"<html>".as_slice())]
    fn rejects_unusable_envelopes(#[case] body: &[u8]) {
        assert!(parse_rpc_response(body).is_err());
    }

    #[test]
    fn fetches_and_decodes_remote_whitelist() {
        let blob = Whitelist::from_rules([crate::WhitelistRule {
            mr_enclave: crate::RuleField::exact("aa").expect("field"),
            ..crate::WhitelistRule::default()
        }])
        .encode();
        let config = format!(r#"{{"{WHITELIST_FIELD}":"{blob}","other":1}}"#);
        let reader = reader_returning(Ok(abi_string(&config)));

        let whitelist = fetch_remote_whitelist(&reader, "0xcontract").expect("fetch");
        assert_eq!(whitelist.len(), 1);
    }

    #[test]
    fn missing_field_is_reported() {
        let reader = reader_returning(Ok(abi_string(r#"{"unrelated":"x"}"#)));
        let error = fetch_remote_whitelist(&reader, "0xcontract").expect_err("must fail");
        assert!(matches!(error, RemoteError::MissingField { .. }));
    }

    #[test]
    fn truncated_response_is_reported() {
        let reader = reader_returning(Ok("0x0000".to_owned()));
        let error = fetch_remote_whitelist(&reader, "0xcontract").expect_err("must fail");
        assert!(matches!(error, RemoteError::Abi(_)));
    }

    #[test]
    fn transport_errors_propagate() {
        let reader = reader_returning(Err(RemoteError::Status { status: 502 }));
        let error = fetch_remote_whitelist(&reader, "0xcontract").expect_err("must fail");
        assert!(matches!(error, RemoteError::Status { status: 502 }));
    }
}

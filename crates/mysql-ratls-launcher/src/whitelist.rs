//! Whitelist resolution: the manifest whitelist merged with the one held by
//! the configured contract.

use launcher_config::AttestationSettings;
use ratls_whitelist::{
    ContractReader, JsonRpcContractReader, RemoteError, Whitelist, fetch_remote_whitelist,
};
use tracing::info;

use crate::errors::{LaunchError, Stage, StageError, settle};
use crate::reporter::StageReporter;

const WHITELIST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::whitelist");

/// Builds contract readers for an RPC endpoint.
pub trait ReaderFactory {
    /// Returns a reader bound to `endpoint`.
    fn connect(&self, endpoint: &str) -> Result<Box<dyn ContractReader>, RemoteError>;
}

/// [`ReaderFactory`] producing JSON-RPC readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcReaderFactory;

impl ReaderFactory for JsonRpcReaderFactory {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn ContractReader>, RemoteError> {
        Ok(Box::new(JsonRpcContractReader::new(endpoint)?))
    }
}

fn remote_whitelist(
    settings: &AttestationSettings,
    readers: &dyn ReaderFactory,
) -> Result<Option<Whitelist>, StageError> {
    let Some((contract, endpoint)) = settings.remote_source() else {
        return Ok(None);
    };
    let degrade = |error: RemoteError| {
        StageError::degraded(
            Stage::Whitelist,
            format!("remote whitelist unavailable from {contract}: {error}"),
        )
    };
    let reader = readers.connect(endpoint).map_err(degrade)?;
    let whitelist = fetch_remote_whitelist(reader.as_ref(), contract).map_err(degrade)?;
    info!(target: WHITELIST_TARGET, contract, rules = whitelist.len(), "read remote whitelist");
    Ok(Some(whitelist))
}

/// Produces the whitelist exported to the target, Base64-encoded.
///
/// The manifest whitelist is the base and must decode. Rules read from the
/// contract are appended when new; any remote failure degrades to the
/// manifest whitelist alone. Returns `None` when neither source has rules.
pub fn resolve_whitelist(
    settings: &AttestationSettings,
    readers: &dyn ReaderFactory,
    reporter: &dyn StageReporter,
) -> Result<Option<String>, LaunchError> {
    let local = settings
        .local_whitelist
        .as_deref()
        .map(Whitelist::decode)
        .transpose()
        .map_err(|source| LaunchError::LocalWhitelist { source })?
        .unwrap_or_default();
    let remote = settle(remote_whitelist(settings, readers), || None, reporter)?;

    let merged = remote.map_or_else(|| local.clone(), |fetched| local.merge(&fetched));
    info!(
        target: WHITELIST_TARGET,
        local = local.len(),
        merged = merged.len(),
        "whitelist resolved"
    );
    Ok((!merged.is_empty()).then(|| merged.encode()))
}

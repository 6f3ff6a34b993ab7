//! Environment snapshot and the variable names the launcher reads.
//!
//! The launcher never reads `std::env` directly outside
//! [`EnvSnapshot::from_process`]; every stage receives the snapshot so tests
//! can describe a manifest environment without mutating the test process.

use std::collections::BTreeMap;
use std::env;

use crate::ConfigError;

/// Smart contract address holding the remote SGX configuration.
pub const CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";
/// JSON-RPC endpoint used for the contract call.
pub const RPC_URL: &str = "RPC_URL";
/// Base64 whitelist blob consumed by the attestation library.
pub const RATLS_WHITELIST_CONFIG: &str = "RATLS_WHITELIST_CONFIG";
/// Certificate path handed to the attestation library.
pub const RATLS_CERT_PATH: &str = "RATLS_CERT_PATH";
/// Private key path handed to the attestation library.
pub const RATLS_KEY_PATH: &str = "RATLS_KEY_PATH";
/// Live data directory.
pub const MYSQL_DATA_DIR: &str = "MYSQL_DATA_DIR";
/// Encrypted mount point that must contain every secret path.
pub const RATLS_SECURE_ROOT: &str = "RATLS_SECURE_ROOT";
/// Template data directory copied on first boot.
pub const MYSQL_TEMPLATE_DIR: &str = "MYSQL_TEMPLATE_DIR";
/// Server log directory.
pub const MYSQL_LOG_DIR: &str = "MYSQL_LOG_DIR";
/// Directory for generated replication configuration.
pub const MYSQL_GR_CONFIG_DIR: &str = "MYSQL_GR_CONFIG_DIR";
/// Directory for operator-visible identity copies.
pub const MYSQL_PUBLIC_DIR: &str = "MYSQL_PUBLIC_DIR";
/// Certificate key algorithm.
pub const RA_TLS_CERT_ALGORITHM: &str = "RA_TLS_CERT_ALGORITHM";
/// Peer verification toggle.
pub const RATLS_ENABLE_VERIFY: &str = "RATLS_ENABLE_VERIFY";
/// Mutual authentication toggle.
pub const RATLS_REQUIRE_PEER_CERT: &str = "RATLS_REQUIRE_PEER_CERT";
/// Replication group name.
pub const MYSQL_GR_GROUP_NAME: &str = "MYSQL_GR_GROUP_NAME";
/// Comma-separated replication seeds.
pub const MYSQL_GR_SEEDS: &str = "MYSQL_GR_SEEDS";
/// Local replication address override.
pub const MYSQL_GR_LOCAL_ADDRESS: &str = "MYSQL_GR_LOCAL_ADDRESS";
/// Bootstrap a new group instead of joining.
pub const MYSQL_GR_BOOTSTRAP: &str = "MYSQL_GR_BOOTSTRAP";
/// Verbose replication diagnostics.
pub const MYSQL_GR_DEBUG: &str = "MYSQL_GR_DEBUG";
/// Client-facing server port.
pub const MYSQL_PORT: &str = "MYSQL_PORT";
/// Group communication port.
pub const MYSQL_GR_PORT: &str = "MYSQL_GR_PORT";
/// Skip the final exec and print the command.
pub const RATLS_LAUNCHER_DRY_RUN: &str = "RATLS_LAUNCHER_DRY_RUN";
/// Launch target (`server` or `client`).
pub const RATLS_LAUNCH_TARGET: &str = "RATLS_LAUNCH_TARGET";
/// Explicit target binary path.
pub const RATLS_TARGET_BINARY: &str = "RATLS_TARGET_BINARY";
/// Explicit attestation library path.
pub const RATLS_PRELOAD_PATH: &str = "RATLS_PRELOAD_PATH";
/// Launcher log filter.
pub const RATLS_LAUNCHER_LOG_FILTER: &str = "RATLS_LAUNCHER_LOG_FILTER";
/// Launcher log format.
pub const RATLS_LAUNCHER_LOG_FORMAT: &str = "RATLS_LAUNCHER_LOG_FORMAT";
/// Address list read by the interface-enumeration shim in the target.
pub const GR_LOCAL_IP: &str = "GR_LOCAL_IP";
/// Dynamic loader preload list, produced for the target only.
pub const LD_PRELOAD: &str = "LD_PRELOAD";

/// Immutable view of the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped; none of
    /// the launcher's inputs can be expressed that way.
    #[must_use]
    pub fn from_process() -> Self {
        let vars = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Builds a snapshot from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Returns a non-empty value for `key`. Empty values count as unset.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns true when `key` holds a non-empty value.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over every captured variable, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Parses the boolean spellings accepted in manifests and flags.
pub fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: raw.to_owned(),
        }),
    }
}

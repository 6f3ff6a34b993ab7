//! Replication settings resolved from the manifest environment and flags.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ConfigError;

/// File in the data directory holding the persisted replication group name.
pub const GROUP_NAME_FILE: &str = ".gr_group_name";

/// File in the data directory holding the persisted server id.
pub const SERVER_ID_FILE: &str = ".gr_server_id";

/// How this node takes part in group replication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Replication is not configured.
    #[default]
    Disabled,
    /// This node creates the group.
    Bootstrap,
    /// This node joins an existing group through its seeds.
    Join,
}

impl ReplicationMode {
    /// Returns true for bootstrap and join.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// A `host:port` pair used as a replication seed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// Group communication port.
    pub port: u16,
}

impl PeerAddress {
    /// Builds a peer address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]:port` or a bare IPv6 literal.
    ///
    /// Missing ports default to `default_port`.
    pub fn parse(raw: &str, default_port: u16) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidAddress {
            name: "replication seed",
            value: raw.to_owned(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(invalid());
        }

        if let Ok(address) = trimmed.parse::<SocketAddr>() {
            return non_zero(address.port())
                .map(|port| Self::new(address.ip().to_string(), port))
                .ok_or_else(invalid);
        }
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(Self::new(ip.to_string(), default_port));
        }
        if trimmed.starts_with('[') {
            return Err(invalid());
        }

        match trimmed.rsplit_once(':') {
            Some((host, digits)) if !host.is_empty() && !host.contains(':') => {
                let port = digits
                    .parse::<u16>()
                    .ok()
                    .and_then(non_zero)
                    .ok_or_else(invalid)?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(invalid()),
            None => Ok(Self::new(trimmed, default_port)),
        }
    }
}

const fn non_zero(port: u16) -> Option<u16> {
    if port == 0 { None } else { Some(port) }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses a comma-separated seed list, dropping empty entries and
/// duplicates while keeping first-occurrence order.
pub fn parse_seed_list(raw: &str, default_port: u16) -> Result<Vec<PeerAddress>, ConfigError> {
    let mut seeds: Vec<PeerAddress> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let peer = PeerAddress::parse(entry, default_port)?;
        if !seeds.contains(&peer) {
            seeds.push(peer);
        }
    }
    Ok(seeds)
}

/// Parses a local-address override; a `:port` suffix is ignored.
pub fn parse_local_address(raw: &str) -> Result<IpAddr, ConfigError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<IpAddr>()
        .or_else(|_| trimmed.parse::<SocketAddr>().map(|address| address.ip()))
        .map_err(|_| ConfigError::InvalidAddress {
            name: "local replication address",
            value: raw.to_owned(),
        })
}

/// Resolved replication settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationSettings {
    /// Participation mode.
    pub mode: ReplicationMode,
    /// Group name configured explicitly through the environment or a flag.
    pub group_name: Option<String>,
    /// Group name found in the data directory at resolution time.
    pub persisted_group_name: Option<String>,
    /// Caller-supplied seeds, deduplicated.
    pub seeds: Vec<PeerAddress>,
    /// Local address override.
    pub local_address: Option<IpAddr>,
    /// Group communication port.
    pub port: u16,
    /// Whether the port was set explicitly.
    pub port_explicit: bool,
    /// Verbose replication diagnostics.
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("10.0.0.2:33071", "10.0.0.2", 33071)]
    #[case("10.0.0.2", "10.0.0.2", 33061)]
    #[case("db-1.internal:4000", "db-1.internal", 4000)]
    #[case("[fd00::2]:33062", "fd00::2", 33062)]
    #[case("fd00::2", "fd00::2", 33061)]
    fn parses_seed_forms(#[case] raw: &str, #[case] host: &str, #[case] port: u16) {
        let peer = PeerAddress::parse(raw, 33061).expect("seed should parse");
        assert_eq!(peer, PeerAddress::new(host, port));
    }

    #[rstest]
    #[case("10.0.0.2:0")]
    #[case("10.0.0.2:http")]
    #[case(":33061")]
    #[case("two words")]
    fn rejects_malformed_seeds(#[case] raw: &str) {
        assert!(PeerAddress::parse(raw, 33061).is_err());
    }

    #[test]
    fn seed_lists_are_deduplicated_in_order() {
        let seeds = parse_seed_list("10.0.0.3, 10.0.0.2:33061,,10.0.0.3:33061", 33061)
            .expect("seed list should parse");
        assert_eq!(
            seeds,
            vec![
                PeerAddress::new("10.0.0.3", 33061),
                PeerAddress::new("10.0.0.2", 33061),
            ]
        );
    }

    #[test]
    fn ipv6_peers_are_bracketed_when_displayed() {
        assert_eq!(PeerAddress::new("fd00::2", 1).to_string(), "[fd00::2]:1");
        assert_eq!(PeerAddress::new("10.0.0.1", 1).to_string(), "10.0.0.1:1");
    }

    #[test]
    fn local_address_ignores_port_suffix() {
        let ip = parse_local_address("10.1.2.3:33061").expect("address should parse");
        assert_eq!(ip.to_string(), "10.1.2.3");
    }
}

//! Interface emulation for environments without netlink.
//!
//! Addresses come from `GR_LOCAL_IP` (a comma-separated list whose entries
//! may carry a `:port` suffix) and, when that yields nothing, from the UDP
//! route probe.

use std::env;
use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::{AddressProbe, InterfaceEnumerator, InterfaceError, LocalInterface, UdpRouteProbe};

/// Environment variable listing the node's addresses.
pub const GR_LOCAL_IP: &str = "GR_LOCAL_IP";

/// Largest number of addresses taken from the list.
pub const MAX_ADDRESSES: usize = 16;

const EMULATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::emulated");

/// Parses an address list, keeping valid, distinct IPv4 entries in order.
///
/// Entries are trimmed, a `:port` suffix is dropped and invalid entries are
/// skipped. At most [`MAX_ADDRESSES`] addresses are returned.
#[must_use]
pub fn parse_address_list(raw: &str) -> Vec<Ipv4Addr> {
    let mut addresses = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        if addresses.len() == MAX_ADDRESSES {
            warn!(
                target: EMULATION_TARGET,
                limit = MAX_ADDRESSES,
                "address list truncated"
            );
            break;
        }
        let host = entry.split(':').next().unwrap_or(entry).trim();
        match host.parse::<Ipv4Addr>() {
            Ok(address) if !addresses.contains(&address) => addresses.push(address),
            Ok(_) => {}
            Err(_) => warn!(target: EMULATION_TARGET, entry, "skipping invalid address"),
        }
    }
    addresses
}

/// [`InterfaceEnumerator`] that fabricates `eth0..` interfaces.
pub struct EmulatedInterfaces {
    configured: Option<String>,
    probe: Box<dyn AddressProbe + Send + Sync>,
}

impl EmulatedInterfaces {
    /// Reads `GR_LOCAL_IP` from the process environment and falls back to
    /// the UDP route probe.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(env::var(GR_LOCAL_IP).ok(), UdpRouteProbe)
    }

    /// Builds an enumerator from an explicit list and probe.
    #[must_use]
    pub fn new(configured: Option<String>, probe: impl AddressProbe + Send + Sync + 'static) -> Self {
        Self {
            configured,
            probe: Box::new(probe),
        }
    }
}

impl InterfaceEnumerator for EmulatedInterfaces {
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError> {
        let mut addresses = self
            .configured
            .as_deref()
            .map(parse_address_list)
            .unwrap_or_default();

        if addresses.is_empty() {
            debug!(target: EMULATION_TARGET, "no configured addresses, probing route");
            match self.probe.detect() {
                Ok(address) => addresses.push(address),
                Err(error) => {
                    warn!(target: EMULATION_TARGET, %error, "route probe failed");
                    return Err(InterfaceError::NoAddresses);
                }
            }
        }

        Ok(addresses
            .into_iter()
            .enumerate()
            .map(|(index, address)| LocalInterface::emulated(index, address))
            .collect())
    }
}

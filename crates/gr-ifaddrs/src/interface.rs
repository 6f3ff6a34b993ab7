//! Interface model shared by the OS-backed and emulated enumerators.

use std::net::{IpAddr, Ipv4Addr};

use crate::InterfaceError;

/// Netmask reported for emulated interfaces.
pub const EMULATED_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// One address-bearing network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    /// Interface name, such as `eth0`.
    pub name: String,
    /// Interface address.
    pub address: IpAddr,
    /// Interface netmask, when known.
    pub netmask: Option<IpAddr>,
    /// Whether the interface is administratively up.
    pub up: bool,
    /// Whether the interface is running.
    pub running: bool,
}

impl LocalInterface {
    /// Builds the `index`th emulated interface for `address`.
    #[must_use]
    pub fn emulated(index: usize, address: Ipv4Addr) -> Self {
        Self {
            name: format!("eth{index}"),
            address: IpAddr::V4(address),
            netmask: Some(IpAddr::V4(EMULATED_NETMASK)),
            up: true,
            running: true,
        }
    }
}

/// Lists the addresses the replication engine may bind to.
pub trait InterfaceEnumerator {
    /// Returns the interfaces in a stable order.
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError>;
}

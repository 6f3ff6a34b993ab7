//! Interface enumeration through the operating system's `getifaddrs`.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::sys::socket::SockaddrStorage;

use crate::{InterfaceEnumerator, InterfaceError, LocalInterface};

/// [`InterfaceEnumerator`] backed by the host's interface table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

fn ip_of(storage: &SockaddrStorage) -> Option<IpAddr> {
    if let Some(v4) = storage.as_sockaddr_in() {
        return Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
    }
    storage
        .as_sockaddr_in6()
        .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
}

impl InterfaceEnumerator for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError> {
        let entries = getifaddrs().map_err(|source| InterfaceError::System { source })?;
        let interfaces: Vec<LocalInterface> = entries
            .filter_map(|entry| {
                let address = entry.address.as_ref().and_then(ip_of)?;
                Some(LocalInterface {
                    name: entry.interface_name,
                    address,
                    netmask: entry.netmask.as_ref().and_then(ip_of),
                    up: entry.flags.contains(InterfaceFlags::IFF_UP),
                    running: entry.flags.contains(InterfaceFlags::IFF_RUNNING),
                })
            })
            .collect();
        if interfaces.is_empty() {
            return Err(InterfaceError::NoAddresses);
        }
        Ok(interfaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_reports_at_least_loopback() {
        let interfaces = SystemInterfaces.interfaces().expect("host interfaces");
        assert!(interfaces.iter().any(|i| i.address.is_loopback()));
    }
}

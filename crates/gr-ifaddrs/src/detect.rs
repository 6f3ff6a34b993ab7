//! Local address discovery by routing a connected UDP socket.
//!
//! Connecting a datagram socket sends nothing; the kernel only selects the
//! route, after which the socket's local address is the one a peer would
//! see.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Public address used only to select a route.
pub const PROBE_DESTINATION: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53);

/// Source of the node's primary IPv4 address.
pub trait AddressProbe {
    /// Returns the address outgoing traffic would use.
    fn detect(&self) -> io::Result<Ipv4Addr>;
}

/// [`AddressProbe`] backed by a connected UDP socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpRouteProbe;

impl AddressProbe for UdpRouteProbe {
    fn detect(&self) -> io::Result<Ipv4Addr> {
        detect_local_ipv4()
    }
}

/// Detects the local IPv4 address routed towards [`PROBE_DESTINATION`].
pub fn detect_local_ipv4() -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(PROBE_DESTINATION)?;
    match socket.local_addr()? {
        SocketAddr::V4(address) if !address.ip().is_unspecified() => Ok(*address.ip()),
        other => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("route probe returned unusable local address {other}"),
        )),
    }
}

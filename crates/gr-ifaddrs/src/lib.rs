//! Network-interface enumeration for group replication inside an enclave.
//!
//! The replication engine discovers its own addresses with `getifaddrs`,
//! which needs netlink sockets the enclave runtime does not provide. This
//! crate offers the same information through [`InterfaceEnumerator`], with
//! two implementations: [`SystemInterfaces`] asks the operating system and
//! [`EmulatedInterfaces`] builds `eth0..` interfaces from `GR_LOCAL_IP` or a
//! UDP route probe. The `enclave` feature selects the emulated one as
//! [`DefaultInterfaces`]. The `ffi` feature additionally exports
//! `gr_getifaddrs`/`gr_freeifaddrs` for static linking into the server.

mod detect;
mod emulated;
mod error;
#[cfg(all(feature = "ffi", target_os = "linux"))]
pub mod ffi;
mod interface;
mod system;

pub use detect::{AddressProbe, PROBE_DESTINATION, UdpRouteProbe, detect_local_ipv4};
pub use emulated::{EmulatedInterfaces, GR_LOCAL_IP, MAX_ADDRESSES, parse_address_list};
pub use error::InterfaceError;
pub use interface::{EMULATED_NETMASK, InterfaceEnumerator, LocalInterface};
pub use system::SystemInterfaces;

/// Enumerator selected at build time.
#[cfg(feature = "enclave")]
pub type DefaultInterfaces = EmulatedInterfaces;

/// Enumerator selected at build time.
#[cfg(not(feature = "enclave"))]
pub type DefaultInterfaces = SystemInterfaces;

/// Builds the enumerator selected at build time.
#[cfg(feature = "enclave")]
#[must_use]
pub fn default_enumerator() -> DefaultInterfaces {
    EmulatedInterfaces::from_env()
}

/// Builds the enumerator selected at build time.
#[cfg(not(feature = "enclave"))]
#[must_use]
pub const fn default_enumerator() -> DefaultInterfaces {
    SystemInterfaces
}

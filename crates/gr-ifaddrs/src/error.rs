//! Errors reported by interface enumeration.

use std::io;

use thiserror::Error;

/// Failures enumerating local interfaces.
#[derive(Debug, Error)]
pub enum InterfaceError {
    /// Neither the configured list nor the route probe produced an address.
    #[error("no addresses available")]
    NoAddresses,
    /// The operating system enumeration failed.
    #[error("failed to enumerate interfaces: {source}")]
    System {
        /// Underlying errno.
        #[source]
        source: nix::errno::Errno,
    },
    /// The UDP route probe failed.
    #[error("failed to detect the local address: {source}")]
    Probe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

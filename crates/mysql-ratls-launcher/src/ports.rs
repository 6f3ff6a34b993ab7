//! Port selection for the service and group communication listeners.
//!
//! An explicitly configured port is used as-is or not at all. A default port
//! that is taken is replaced by the next free one above it.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::{debug, info};

const PORTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ports");

/// Errors raised while choosing a port.
#[derive(Debug, Error)]
pub enum PortError {
    /// An explicitly requested port is in use.
    #[error("port {port} set by {setting} is already in use")]
    Occupied {
        /// Requested port.
        port: u16,
        /// Setting that requested it.
        setting: &'static str,
    },
    /// No free port was found between the default and 65535.
    #[error("no free port for {setting} between {start} and 65535")]
    Exhausted {
        /// First port tried.
        start: u16,
        /// Setting being allocated.
        setting: &'static str,
    },
}

/// Checks whether a port can be bound.
#[cfg_attr(test, mockall::automock)]
pub trait PortProbe {
    /// Returns true when `port` is free on every IPv4 interface.
    fn is_available(&self, port: u16) -> bool;
}

/// [`PortProbe`] that binds `0.0.0.0:port` with `SO_REUSEADDR` and releases
/// the socket immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketPortProbe;

fn bind_probe(port: u16) -> io::Result<()> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
}

impl PortProbe for SocketPortProbe {
    fn is_available(&self, port: u16) -> bool {
        match bind_probe(port) {
            Ok(()) => true,
            Err(error) => {
                debug!(target: PORTS_TARGET, port, %error, "port unavailable");
                false
            }
        }
    }
}

/// A port to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRequest {
    /// Configured or default port.
    pub port: u16,
    /// Whether the port was configured explicitly.
    pub explicit: bool,
    /// Setting name used in errors.
    pub setting: &'static str,
}

/// Chooses the port for `request`, never returning one listed in
/// `reserved`.
pub fn allocate(
    request: PortRequest,
    probe: &dyn PortProbe,
    reserved: &[u16],
) -> Result<u16, PortError> {
    let PortRequest {
        port,
        explicit,
        setting,
    } = request;
    if explicit {
        return if !reserved.contains(&port) && probe.is_available(port) {
            Ok(port)
        } else {
            Err(PortError::Occupied { port, setting })
        };
    }

    let chosen = (port..=u16::MAX)
        .filter(|candidate| !reserved.contains(candidate))
        .find(|candidate| probe.is_available(*candidate))
        .ok_or(PortError::Exhausted {
            start: port,
            setting,
        })?;
    if chosen != port {
        info!(target: PORTS_TARGET, setting, requested = port, chosen, "default port busy, using next free port");
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use mockall::predicate::eq;
    use rstest::rstest;

    use super::*;

    fn request(port: u16, explicit: bool) -> PortRequest {
        PortRequest {
            port,
            explicit,
            setting: "MYSQL_PORT",
        }
    }

    #[test]
    fn explicit_port_in_use_is_an_error() {
        let mut probe = MockPortProbe::new();
        probe.expect_is_available().with(eq(3306)).return_const(false);
        let error = allocate(request(3306, true), &probe, &[]).expect_err("must fail");
        assert!(matches!(error, PortError::Occupied { port: 3306, .. }));
    }

    #[test]
    fn explicit_free_port_is_kept() {
        let mut probe = MockPortProbe::new();
        probe.expect_is_available().with(eq(3310)).return_const(true);
        assert_eq!(allocate(request(3310, true), &probe, &[]).expect("free"), 3310);
    }

    #[rstest]
    #[case(&[3306, 3307], &[], 3308)]
    #[case(&[3306], &[3307], 3308)]
    #[case(&[], &[3306], 3307)]
    fn default_port_scans_upwards(
        #[case] busy: &'static [u16],
        #[case] reserved: &[u16],
        #[case] expected: u16,
    ) {
        let mut probe = MockPortProbe::new();
        probe
            .expect_is_available()
            .returning(move |port| !busy.contains(&port));
        assert_eq!(
            allocate(request(3306, false), &probe, reserved).expect("scan"),
            expected
        );
    }

    #[test]
    fn scan_stops_at_the_top_of_the_range() {
        let mut probe = MockPortProbe::new();
        probe.expect_is_available().return_const(false);
        let error = allocate(request(65534, false), &probe, &[]).expect_err("exhausted");
        assert!(matches!(error, PortError::Exhausted { start: 65534, .. }));
    }

    #[test]
    fn socket_probe_sees_a_bound_listener() {
        let listener = TcpListener::bind("0.0.0.0:0").expect("bind ephemeral");
        let port = listener.local_addr().expect("address").port();
        assert!(!SocketPortProbe.is_available(port));
        drop(listener);
    }
}

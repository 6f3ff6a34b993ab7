//! C entry points with the `getifaddrs(3)` calling convention.
//!
//! Each interface is one heap block holding the `ifaddrs` record followed
//! by the storage its pointers refer to. `ifaddrs` is the first field, so a
//! list node pointer is also the block pointer handed back to `Box`.

use std::ffi::{c_char, c_int, c_uint};
use std::net::{IpAddr, Ipv4Addr};
use std::ptr;

use tracing::debug;

use crate::{EmulatedInterfaces, InterfaceEnumerator, InterfaceError, LocalInterface};

const NAME_LEN: usize = 16;

const FFI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ffi");

#[repr(C)]
struct InterfaceBlock {
    ifa: libc::ifaddrs,
    addr: libc::sockaddr_in,
    netmask: libc::sockaddr_in,
    name: [c_char; NAME_LEN],
}

fn sockaddr_v4(address: Ipv4Addr) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::sa_family_t::try_from(libc::AF_INET).unwrap_or_default(),
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from(address).to_be(),
        },
        sin_zero: [0; 8],
    }
}

fn c_name(label: &str) -> [c_char; NAME_LEN] {
    let mut name = [0; NAME_LEN];
    for (slot, byte) in name.iter_mut().zip(label.bytes().take(NAME_LEN - 1)) {
        *slot = c_char::try_from(byte).unwrap_or_default();
    }
    name
}

fn as_ipv4(address: Option<IpAddr>) -> Ipv4Addr {
    match address {
        Some(IpAddr::V4(v4)) => v4,
        _ => Ipv4Addr::UNSPECIFIED,
    }
}

/// Allocates one list node. The returned pointer owns the block.
fn allocate_block(interface: &LocalInterface) -> *mut libc::ifaddrs {
    let flags = c_uint::try_from(libc::IFF_UP | libc::IFF_RUNNING).unwrap_or_default();
    let mut block = Box::new(InterfaceBlock {
        ifa: libc::ifaddrs {
            ifa_next: ptr::null_mut(),
            ifa_name: ptr::null_mut(),
            ifa_flags: flags,
            ifa_addr: ptr::null_mut(),
            ifa_netmask: ptr::null_mut(),
            ifa_ifu: ptr::null_mut(),
            ifa_data: ptr::null_mut(),
        },
        addr: sockaddr_v4(as_ipv4(Some(interface.address))),
        netmask: sockaddr_v4(as_ipv4(interface.netmask)),
        name: c_name(&interface.name),
    });
    block.ifa.ifa_name = block.name.as_mut_ptr();
    block.ifa.ifa_addr = ptr::addr_of_mut!(block.addr).cast();
    block.ifa.ifa_netmask = ptr::addr_of_mut!(block.netmask).cast();
    Box::into_raw(block).cast()
}

fn set_errno(code: c_int) {
    // SAFETY: `__errno_location` returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = code };
}

/// Builds the emulated interface list.
///
/// Returns `0` and stores the list head in `*ifap` on success. Returns `-1`
/// with `errno` set to `EINVAL` for a null `ifap`, or `ENOSYS` when no
/// address can be found.
///
/// # Safety
///
/// `ifap` must be null or valid for a pointer-sized write. The list must be
/// released with [`gr_freeifaddrs`], never with `freeifaddrs`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gr_getifaddrs(ifap: *mut *mut libc::ifaddrs) -> c_int {
    if ifap.is_null() {
        set_errno(libc::EINVAL);
        return -1;
    }
    // SAFETY: non-null and writable per the contract above.
    unsafe { *ifap = ptr::null_mut() };

    let interfaces = match EmulatedInterfaces::from_env().interfaces() {
        Ok(interfaces) => interfaces,
        Err(InterfaceError::NoAddresses | InterfaceError::Probe { .. }) => {
            set_errno(libc::ENOSYS);
            return -1;
        }
        Err(InterfaceError::System { source }) => {
            set_errno(source as c_int);
            return -1;
        }
    };

    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    for interface in interfaces.iter().rev() {
        let node = allocate_block(interface);
        // SAFETY: `node` was just produced by `allocate_block` and is unaliased.
        unsafe { (*node).ifa_next = head };
        head = node;
        debug!(target: FFI_TARGET, name = %interface.name, address = %interface.address, "emulated interface");
    }

    // SAFETY: as above.
    unsafe { *ifap = head };
    0
}

/// Releases a list returned by [`gr_getifaddrs`].
///
/// # Safety
///
/// `ifa` must be null or a head returned by [`gr_getifaddrs`] that has not
/// been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gr_freeifaddrs(ifa: *mut libc::ifaddrs) {
    let mut node = ifa;
    while !node.is_null() {
        // SAFETY: every node is the first field of a boxed `InterfaceBlock`.
        let block = unsafe { Box::from_raw(node.cast::<InterfaceBlock>()) };
        node = block.ifa.ifa_next;
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    #[test]
    fn blocks_are_self_referential_and_freeable() {
        let interface = LocalInterface::emulated(3, Ipv4Addr::new(10, 1, 2, 3));
        let node = allocate_block(&interface);
        // SAFETY: `node` is a live block from `allocate_block`.
        unsafe {
            let name = CStr::from_ptr((*node).ifa_name);
            assert_eq!(name.to_str().expect("ascii"), "eth3");
            let addr = (*node).ifa_addr.cast::<libc::sockaddr_in>();
            assert_eq!(
                Ipv4Addr::from(u32::from_be((*addr).sin_addr.s_addr)),
                Ipv4Addr::new(10, 1, 2, 3)
            );
            let mask = (*node).ifa_netmask.cast::<libc::sockaddr_in>();
            assert_eq!(
                Ipv4Addr::from(u32::from_be((*mask).sin_addr.s_addr)),
                Ipv4Addr::new(255, 255, 255, 0)
            );
            gr_freeifaddrs(node);
        }
    }

    #[test]
    fn null_output_pointer_is_rejected() {
        // SAFETY: a null pointer is explicitly allowed.
        let status = unsafe { gr_getifaddrs(ptr::null_mut()) };
        assert_eq!(status, -1);
    }
}

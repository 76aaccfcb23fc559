//! Legacy ioctl bridge operations.
//!
//! Used when netlink refuses to create a bridge or enslave an interface,
//! which happens on old kernels and some restricted environments.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use h3cbr_common::{NetError, NetResult};
use rustix::net::{AddressFamily, SocketType, socket};

use crate::gateway::Link;

const SIOCBRADDBR: libc::c_ulong = 0x89a0;
const SIOCBRADDIF: libc::c_ulong = 0x89a2;

fn control_socket(operation: &'static str, name: &str) -> NetResult<OwnedFd> {
    socket(AddressFamily::UNIX, SocketType::STREAM, None)
        .map_err(|e| NetError::link(operation, name, io::Error::from(e)))
}

fn check_name(operation: &'static str, name: &str) -> NetResult<()> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ {
        return Err(NetError::link(
            operation,
            name,
            io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name length"),
        ));
    }
    Ok(())
}

/// Create a bridge with `SIOCBRADDBR`.
///
/// # Errors
///
/// Fails with the OS error returned by the ioctl.
pub fn create_bridge(name: &str) -> NetResult<()> {
    const OP: &str = "create bridge via ioctl";
    check_name(OP, name)?;
    let cname = CString::new(name).map_err(|e| NetError::link(OP, name, e))?;
    let fd = control_socket(OP, name)?;

    // SAFETY: the fd is a valid open socket and cname is NUL-terminated and
    // shorter than IFNAMSIZ.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), SIOCBRADDBR as _, cname.as_ptr()) };
    if rc < 0 {
        return Err(NetError::link(OP, name, io::Error::last_os_error()));
    }
    tracing::debug!(bridge = name, "Created bridge via ioctl");
    Ok(())
}

/// Attach `link` to `bridge` with `SIOCBRADDIF`.
///
/// # Errors
///
/// Fails with the OS error returned by the ioctl.
pub fn add_to_bridge(bridge: &str, link: &Link) -> NetResult<()> {
    const OP: &str = "attach to bridge via ioctl";
    check_name(OP, bridge)?;
    let index = libc::c_int::try_from(link.index).map_err(|e| NetError::link(OP, &link.name, e))?;
    let fd = control_socket(OP, &link.name)?;

    // SAFETY: ifreq is plain old data; all-zero is a valid value.
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bridge.bytes()) {
        *dst = src as libc::c_char;
    }
    ifr.ifr_ifru.ifru_ifindex = index;

    // SAFETY: the fd is a valid open socket and ifr lives for the call.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), SIOCBRADDIF as _, &mut ifr) };
    if rc < 0 {
        return Err(NetError::link(OP, &link.name, io::Error::last_os_error()));
    }
    tracing::debug!(bridge, interface = %link.name, "Attached interface via ioctl");
    Ok(())
}

//! Process-level helpers.

use std::io;

/// Holds the single-instance lock for the lifetime of the daemon.
/// Dropping it releases the lock.
pub struct InstanceLock {
    #[cfg(target_os = "linux")]
    _socket: std::os::unix::net::UnixListener,
}

/// Guarantee at most one running sensor per host by binding a unix
/// socket in the abstract namespace. A second instance fails to bind.
#[cfg(target_os = "linux")]
pub fn lock_instance(name: &str) -> io::Result<InstanceLock> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixListener};

    let addr = SocketAddr::from_abstract_name(name)?;
    let socket = UnixListener::bind_addr(&addr)?;
    Ok(InstanceLock { _socket: socket })
}

#[cfg(not(target_os = "linux"))]
pub fn lock_instance(_name: &str) -> io::Result<InstanceLock> {
    Ok(InstanceLock {})
}

// packages/engine/src/interception/connect.rs
//! `connect` interception
//!
//! Eligible calls (active gate, IPv4 destination, stream socket) are turned
//! into a `CONNECT <ip>:<port>` exchange on the caller's own descriptor. Once
//! the proxy's header block is consumed, the descriptor carries the tunneled
//! stream and the host program uses it as if it had connected directly.

use crate::interception::context::ShimContext;
use crate::interception::primitives::NetPrimitives;
use crate::tunnel::target::ProxyTarget;
use crate::tunnel::transport::TunnelConnection;
use crate::utils::errors::{set_errno, Result};
use libc::{c_int, sockaddr, sockaddr_in, socklen_t};
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;
use tracing::debug;

/// Intercepted `connect(2)`
///
/// Returns 0 once the proxy exchange completed, or -1 with `errno` set. Calls
/// that are not redirected return whatever the real primitive returns.
///
/// # Safety
///
/// `addr` must be null or point to at least `len` readable bytes, as for
/// `connect(2)`.
pub unsafe fn intercept_connect<P: NetPrimitives + ?Sized>(
    context: &ShimContext,
    primitives: &P,
    fd: RawFd,
    addr: *const sockaddr,
    len: socklen_t,
) -> c_int {
    let Some(target) = context.target() else {
        return primitives.connect(fd, addr, len);
    };
    debug!("connect({},...)...", fd);

    let Some(destination) = redirect_destination(fd, addr, len) else {
        return primitives.connect(fd, addr, len);
    };

    match tunnel_connect(target, context.read_timeout(), primitives, fd, destination) {
        Ok(()) => {
            debug!("fd {} tunneled to {} via {}", fd, destination, target);
            0
        }
        Err(e) => {
            debug!("Tunnel to {} on fd {} failed: {}", destination, fd, e);
            set_errno(e.errno());
            -1
        }
    }
}

/// The IPv4 destination of an eligible call, `None` for pass-through
///
/// # Safety
///
/// Same contract as [`intercept_connect`].
pub unsafe fn redirect_destination(
    fd: RawFd,
    addr: *const sockaddr,
    len: socklen_t,
) -> Option<SocketAddrV4> {
    if addr.is_null() || (len as usize) < mem::size_of::<sockaddr_in>() {
        return None;
    }

    let sin = ptr::read_unaligned(addr.cast::<sockaddr_in>());
    if c_int::from(sin.sin_family) != libc::AF_INET || !is_stream_socket(fd) {
        return None;
    }

    Some(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
        u16::from_be(sin.sin_port),
    ))
}

fn is_stream_socket(fd: RawFd) -> bool {
    let mut sock_type: c_int = -1;
    let mut sock_type_len = mem::size_of::<c_int>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            ptr::addr_of_mut!(sock_type).cast(),
            &mut sock_type_len,
        )
    };
    rc == 0 && sock_type == libc::SOCK_STREAM
}

fn tunnel_connect<P: NetPrimitives + ?Sized>(
    target: ProxyTarget,
    read_timeout: Option<Duration>,
    primitives: &P,
    fd: RawFd,
    destination: SocketAddrV4,
) -> Result<()> {
    let mut tunnel = TunnelConnection::borrowed(fd, target, primitives).with_read_timeout(read_timeout);
    let _blocking = tunnel.force_blocking()?;

    let host_port = destination.to_string();
    tunnel.exchange("CONNECT", &host_port, &host_port)?;
    Ok(())
}

// packages/engine/src/interception/resolve.rs
//! `getaddrinfo` interception
//!
//! The name is sent to the proxy as `RESOLVE *` with the name in `Host`. A
//! non-empty `Host` header in the response is a literal address that replaces
//! the name; the caller's hints are kept so address family and socket type
//! filtering still apply. Every failure falls back to resolving the original
//! name.

use crate::interception::context::ShimContext;
use crate::interception::primitives::NetPrimitives;
use crate::tunnel::transport::TunnelConnection;
use libc::{addrinfo, c_char, c_int, sockaddr, socklen_t};
use std::ffi::{CStr, CString};
use tracing::debug;

/// Intercepted `getaddrinfo(3)`
///
/// # Safety
///
/// All pointers must satisfy the `getaddrinfo(3)` contract.
pub unsafe fn intercept_getaddrinfo<P: NetPrimitives + ?Sized>(
    context: &ShimContext,
    primitives: &P,
    node: *const c_char,
    service: *const c_char,
    hints: *const addrinfo,
    res: *mut *mut addrinfo,
) -> c_int {
    if !context.is_active() || node.is_null() {
        return primitives.getaddrinfo(node, service, hints, res);
    }

    let name = CStr::from_ptr(node);
    debug!("getaddrinfo({:?},{:?})...", name, lossy(service));

    if let Some(substitute) = name.to_str().ok().and_then(|name| resolve_substitute(context, primitives, name)) {
        debug!("{:?} -> '{}:{}'", name, substitute.to_string_lossy(), lossy(service));
        let rc = primitives.getaddrinfo(substitute.as_ptr(), service, hints, res);
        if rc == 0 {
            return 0;
        }
        debug!("Resolving substitute {:?} failed ({}), using original name", substitute, rc);
    }

    primitives.getaddrinfo(node, service, hints, res)
}

/// Ask the proxy for a replacement address for `name`
///
/// `None` when the gate is closed, the exchange fails, or the proxy has no
/// substitute.
pub fn resolve_substitute<P: NetPrimitives + ?Sized>(
    context: &ShimContext,
    primitives: &P,
    name: &str,
) -> Option<CString> {
    let target = context.target()?;
    let mut tunnel = TunnelConnection::new(target, primitives).with_read_timeout(context.read_timeout());

    match tunnel.exchange("RESOLVE", "*", name) {
        Ok(head) => CString::new(head.get_header("Host")?).ok(),
        Err(e) => {
            debug!("RESOLVE {} failed: {}", name, e);
            None
        }
    }
}

/// `getnameinfo(3)`, forwarded unchanged whether or not the gate is open
///
/// # Safety
///
/// All pointers must satisfy the `getnameinfo(3)` contract.
#[allow(clippy::too_many_arguments)]
pub unsafe fn passthrough_getnameinfo<P: NetPrimitives + ?Sized>(
    _context: &ShimContext,
    primitives: &P,
    addr: *const sockaddr,
    addrlen: socklen_t,
    host: *mut c_char,
    hostlen: socklen_t,
    serv: *mut c_char,
    servlen: socklen_t,
    flags: c_int,
) -> c_int {
    primitives.getnameinfo(addr, addrlen, host, hostlen, serv, servlen, flags)
}

unsafe fn lossy<'a>(text: *const c_char) -> std::borrow::Cow<'a, str> {
    if text.is_null() {
        "(null)".into()
    } else {
        CStr::from_ptr(text).to_string_lossy()
    }
}

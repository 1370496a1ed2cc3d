// packages/engine/src/interception/primitives.rs
//! The real network primitives the interceptors fall back to
//!
//! The engine never calls `connect`/`getaddrinfo` by name. It goes through
//! [`NetPrimitives`], which the host side supplies:
//!
//! - [`NextPrimitives`]: the next definition in link order (`dlsym(RTLD_NEXT)`),
//!   for use inside an injected library that shadows the libc symbols
//! - [`SystemPrimitives`]: libc called directly, for processes where nothing is
//!   shadowed (tests, the launcher, macOS interposition)

use crate::utils::errors::{set_errno, HookError};
use libc::{addrinfo, c_char, c_int, c_void, sockaddr, socklen_t};
use std::mem;
use tracing::warn;

/// Real socket and name-resolution primitives
///
/// # Safety
///
/// Implementations receive raw pointers straight from the host program and must
/// uphold the contracts of the libc functions they stand for.
pub trait NetPrimitives: Send + Sync {
    /// `connect(2)`
    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int;

    /// `getaddrinfo(3)`
    unsafe fn getaddrinfo(
        &self,
        node: *const c_char,
        service: *const c_char,
        hints: *const addrinfo,
        res: *mut *mut addrinfo,
    ) -> c_int;

    /// `getnameinfo(3)`
    #[allow(clippy::too_many_arguments)]
    unsafe fn getnameinfo(
        &self,
        addr: *const sockaddr,
        addrlen: socklen_t,
        host: *mut c_char,
        hostlen: socklen_t,
        serv: *mut c_char,
        servlen: socklen_t,
        flags: c_int,
    ) -> c_int;
}

/// libc called directly
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrimitives;

impl NetPrimitives for SystemPrimitives {
    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        libc::connect(fd, addr, len)
    }

    unsafe fn getaddrinfo(
        &self,
        node: *const c_char,
        service: *const c_char,
        hints: *const addrinfo,
        res: *mut *mut addrinfo,
    ) -> c_int {
        libc::getaddrinfo(node, service, hints, res)
    }

    unsafe fn getnameinfo(
        &self,
        addr: *const sockaddr,
        addrlen: socklen_t,
        host: *mut c_char,
        hostlen: socklen_t,
        serv: *mut c_char,
        servlen: socklen_t,
        flags: c_int,
    ) -> c_int {
        libc::getnameinfo(addr, addrlen, host, hostlen, serv, servlen, flags as _)
    }
}

type ConnectFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
type GetaddrinfoFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const addrinfo, *mut *mut addrinfo) -> c_int;
type GetnameinfoFn = unsafe extern "C" fn(
    *const sockaddr,
    socklen_t,
    *mut c_char,
    socklen_t,
    *mut c_char,
    socklen_t,
    c_int,
) -> c_int;

/// Primitives resolved with `dlsym(RTLD_NEXT, ...)`
#[derive(Debug, Clone, Copy)]
pub struct NextPrimitives {
    connect: Option<ConnectFn>,
    getaddrinfo: Option<GetaddrinfoFn>,
    getnameinfo: Option<GetnameinfoFn>,
}

impl NextPrimitives {
    /// Look up every primitive once
    pub fn resolve() -> Self {
        unsafe {
            Self {
                connect: lookup(b"connect\0").map(|sym| mem::transmute::<*mut c_void, ConnectFn>(sym)),
                getaddrinfo: lookup(b"getaddrinfo\0")
                    .map(|sym| mem::transmute::<*mut c_void, GetaddrinfoFn>(sym)),
                getnameinfo: lookup(b"getnameinfo\0")
                    .map(|sym| mem::transmute::<*mut c_void, GetnameinfoFn>(sym)),
            }
        }
    }

    fn missing(symbol: &'static str) -> HookError {
        let err = HookError::PrimitiveUnavailable(symbol);
        warn!("{}", err);
        err
    }
}

unsafe fn lookup(symbol: &[u8]) -> Option<*mut c_void> {
    let sym = libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr().cast());
    (!sym.is_null()).then_some(sym)
}

impl NetPrimitives for NextPrimitives {
    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        match self.connect {
            Some(real) => real(fd, addr, len),
            None => {
                set_errno(Self::missing("connect").errno());
                -1
            }
        }
    }

    unsafe fn getaddrinfo(
        &self,
        node: *const c_char,
        service: *const c_char,
        hints: *const addrinfo,
        res: *mut *mut addrinfo,
    ) -> c_int {
        match self.getaddrinfo {
            Some(real) => real(node, service, hints, res),
            None => {
                set_errno(Self::missing("getaddrinfo").errno());
                libc::EAI_SYSTEM
            }
        }
    }

    unsafe fn getnameinfo(
        &self,
        addr: *const sockaddr,
        addrlen: socklen_t,
        host: *mut c_char,
        hostlen: socklen_t,
        serv: *mut c_char,
        servlen: socklen_t,
        flags: c_int,
    ) -> c_int {
        match self.getnameinfo {
            Some(real) => real(addr, addrlen, host, hostlen, serv, servlen, flags),
            None => {
                set_errno(Self::missing("getnameinfo").errno());
                libc::EAI_SYSTEM
            }
        }
    }
}

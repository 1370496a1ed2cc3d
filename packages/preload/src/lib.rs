// packages/preload/src/lib.rs
//! Tunnelhook injectable library
//!
//! Loaded into an unmodified program with `LD_PRELOAD` (or
//! `DYLD_INSERT_LIBRARIES` on macOS). Exports `connect`, `getaddrinfo` and
//! `getnameinfo`, and hands every call to the engine together with the real
//! primitives:
//!
//! - Linux and other ELF targets shadow the libc symbols and reach the real
//!   ones through `dlsym(RTLD_NEXT)`
//! - macOS registers the hooks in `__DATA,__interpose`; calls made from this
//!   image are not interposed, so libc is called directly
//!
//! The context is read from the environment once, by a load-time initializer
//! that runs before the host's `main`, and never changes afterwards. Hooks
//! called before that initializer (from other constructors) fill it on first
//! use instead. A panic inside the engine falls back to the real call.

use libc::{addrinfo, c_char, c_int, sockaddr, socklen_t};
use once_cell::sync::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tunnelhook_engine::interception::{intercept_connect, intercept_getaddrinfo, passthrough_getnameinfo};
use tunnelhook_engine::{NetPrimitives, ShimContext};

static CONTEXT: OnceCell<ShimContext> = OnceCell::new();

fn context() -> &'static ShimContext {
    CONTEXT.get_or_init(ShimContext::from_env)
}

extern "C" fn init_context() {
    let _ = catch_unwind(context);
}

#[used]
#[cfg_attr(any(target_os = "linux", target_os = "android", target_os = "freebsd"), link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static INIT_CONTEXT: extern "C" fn() = init_context;

#[cfg(not(target_os = "macos"))]
mod real {
    use once_cell::sync::Lazy;
    use tunnelhook_engine::NextPrimitives;

    static REAL: Lazy<NextPrimitives> = Lazy::new(NextPrimitives::resolve);

    pub fn primitives() -> &'static NextPrimitives {
        &REAL
    }
}

#[cfg(target_os = "macos")]
mod real {
    use tunnelhook_engine::SystemPrimitives;

    static REAL: SystemPrimitives = SystemPrimitives;

    pub fn primitives() -> &'static SystemPrimitives {
        &REAL
    }
}

/// `connect(2)` replacement
///
/// # Safety
///
/// Same contract as `connect(2)`.
#[cfg_attr(not(target_os = "macos"), export_name = "connect")]
pub unsafe extern "C" fn hooked_connect(fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
    let real = real::primitives();
    catch_unwind(AssertUnwindSafe(|| intercept_connect(context(), real, fd, addr, len)))
        .unwrap_or_else(|_| real.connect(fd, addr, len))
}

/// `getaddrinfo(3)` replacement
///
/// # Safety
///
/// Same contract as `getaddrinfo(3)`.
#[cfg_attr(not(target_os = "macos"), export_name = "getaddrinfo")]
pub unsafe extern "C" fn hooked_getaddrinfo(
    node: *const c_char,
    service: *const c_char,
    hints: *const addrinfo,
    res: *mut *mut addrinfo,
) -> c_int {
    let real = real::primitives();
    catch_unwind(AssertUnwindSafe(|| {
        intercept_getaddrinfo(context(), real, node, service, hints, res)
    }))
    .unwrap_or_else(|_| real.getaddrinfo(node, service, hints, res))
}

/// `getnameinfo(3)` replacement, always forwarded
///
/// # Safety
///
/// Same contract as `getnameinfo(3)`.
#[cfg_attr(not(target_os = "macos"), export_name = "getnameinfo")]
pub unsafe extern "C" fn hooked_getnameinfo(
    addr: *const sockaddr,
    addrlen: socklen_t,
    host: *mut c_char,
    hostlen: socklen_t,
    serv: *mut c_char,
    servlen: socklen_t,
    flags: c_int,
) -> c_int {
    let real = real::primitives();
    catch_unwind(AssertUnwindSafe(|| {
        passthrough_getnameinfo(context(), real, addr, addrlen, host, hostlen, serv, servlen, flags)
    }))
    .unwrap_or_else(|_| real.getnameinfo(addr, addrlen, host, hostlen, serv, servlen, flags))
}

#[cfg(target_os = "macos")]
mod interpose {
    use super::*;

    #[repr(C)]
    pub struct Interpose {
        replacement: *const (),
        original: *const (),
    }

    unsafe impl Sync for Interpose {}

    #[used]
    #[link_section = "__DATA,__interpose"]
    static INTERPOSE_CONNECT: Interpose = Interpose {
        replacement: hooked_connect as *const (),
        original: libc::connect as *const (),
    };

    #[used]
    #[link_section = "__DATA,__interpose"]
    static INTERPOSE_GETADDRINFO: Interpose = Interpose {
        replacement: hooked_getaddrinfo as *const (),
        original: libc::getaddrinfo as *const (),
    };

    #[used]
    #[link_section = "__DATA,__interpose"]
    static INTERPOSE_GETNAMEINFO: Interpose = Interpose {
        replacement: hooked_getnameinfo as *const (),
        original: libc::getnameinfo as *const (),
    };
}

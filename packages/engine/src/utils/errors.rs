// packages/engine/src/utils/errors.rs
//! Error types for the tunnel engine.
//!
//! Errors never cross the interception boundary as-is: interceptors turn them
//! into a pass-through or a connect-style `-1` with [`HookError::errno`] stored
//! in `errno`.

use nix::errno::Errno;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, HookError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum HookError {
    /// Creating or inspecting a socket failed
    #[error("socket operation failed: {0}")]
    Socket(Errno),

    /// The proxy target refused or could not be reached
    #[error("failed to connect to proxy: {0}")]
    ProxyUnreachable(Errno),

    /// Writing the request to the proxy failed
    #[error("failed to send request: {0}")]
    SendFailed(Errno),

    /// The proxy did not finish its response within the read deadline
    #[error("proxy response timed out after {0:?}")]
    Timeout(Duration),

    /// A real primitive could not be resolved through the dynamic linker
    #[error("real primitive `{0}` is unavailable")]
    PrimitiveUnavailable(&'static str),

    /// Configuration could not be read
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The preload library could not be located
    #[error("preload library not found: {0}")]
    LibraryNotFound(String),

    /// Spawning or waiting on a launched process failed
    #[error("process error: {0}")]
    ProcessFailed(String),
}

impl HookError {
    /// The `errno` value a native call would have reported for this failure
    pub fn errno(&self) -> Errno {
        match self {
            HookError::Socket(e) | HookError::ProxyUnreachable(e) | HookError::SendFailed(e) => *e,
            HookError::Timeout(_) => Errno::ETIMEDOUT,
            HookError::PrimitiveUnavailable(_) => Errno::ENOSYS,
            HookError::ConfigError(_) => Errno::EINVAL,
            HookError::LibraryNotFound(_) => Errno::ENOENT,
            HookError::ProcessFailed(_) => Errno::ECHILD,
        }
    }
}

impl From<config::ConfigError> for HookError {
    fn from(err: config::ConfigError) -> Self {
        HookError::ConfigError(err.to_string())
    }
}

/// Store `errno` for the calling thread, as a failing libc call would
pub fn set_errno(errno: Errno) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        *libc::__errno_location() = errno as i32;
    }
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    unsafe {
        *libc::__error() = errno as i32;
    }
}

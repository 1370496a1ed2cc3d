// packages/engine/src/lib.rs
//! Tunnelhook Engine Library
//!
//! Interception of outbound `connect` and `getaddrinfo` calls, tunneling them
//! through a local proxy that speaks a small header-only CONNECT/RESOLVE
//! protocol.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **tunnel**: proxy target, request/response codec, proxy connections
//! - **interception**: activation context, real primitives, connect and
//!   resolve interceptors
//! - **launcher**: running a program with the injectable library preloaded
//! - **observability**: stderr diagnostics
//! - **utils**: configuration and errors
//!
//! The exported C symbols live in the `tunnelhook` cdylib, which delegates
//! every call to this crate.

// Public module exports
pub mod interception;
pub mod launcher;
pub mod observability;
pub mod tunnel;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use interception::context::ShimContext;
pub use interception::primitives::{NetPrimitives, NextPrimitives, SystemPrimitives};
pub use tunnel::target::ProxyTarget;
pub use utils::config::ShimConfig;
pub use utils::errors::{HookError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

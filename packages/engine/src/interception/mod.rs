// packages/engine/src/interception/mod.rs
//! Interception layer
//!
//! Entry points that stand in for the host's socket and resolver calls:
//!
//! - **Connect Interceptor**: `CONNECT` tunneling on the caller's descriptor
//! - **Resolve Interceptor**: `RESOLVE` host substitution for `getaddrinfo`
//! - **Context**: proxy target and activation gate, built once
//! - **Primitives**: the real calls every path falls back to
//!
//! # Architecture
//!
//! ```text
//! Host Program (Unmodified)
//!     │
//!     ├─ connect()     → gate? IPv4? stream? → CONNECT exchange → 0 / -1
//!     │                        └─ no ─────────→ real connect
//!     └─ getaddrinfo() → gate? → RESOLVE exchange → real getaddrinfo(substitute)
//!                              └─ no / failure ──→ real getaddrinfo(name)
//! ```

pub mod connect;
pub mod context;
pub mod primitives;
pub mod resolve;

// Re-export commonly used types
pub use connect::{intercept_connect, redirect_destination};
pub use context::ShimContext;
pub use primitives::{NetPrimitives, NextPrimitives, SystemPrimitives};
pub use resolve::{intercept_getaddrinfo, passthrough_getnameinfo, resolve_substitute};

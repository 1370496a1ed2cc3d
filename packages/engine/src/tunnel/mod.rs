// packages/engine/src/tunnel/mod.rs
//! Client side of the tunnel protocol
//!
//! The proxy speaks a header-only, HTTP-shaped protocol with two verbs:
//!
//! - **RESOLVE**: `RESOLVE * HTTP/1.1` with the name in `Host`; the proxy answers
//!   with a `Host: <ip>` header (blank when it has no substitute)
//! - **CONNECT**: `CONNECT <ip>:<port> HTTP/1.1`; once the header block is read,
//!   the socket carries the tunneled stream
//!
//! # Architecture
//!
//! ```text
//! Interceptor ──► build_request() ──► TunnelConnection::exchange()
//!                                        │  acquire() / connect()
//!                                        │  send request
//!                                        ▼
//!                                     parse_response() ──► ResponseHead
//! ```

pub mod codec;
pub mod target;
pub mod transport;

// Re-export commonly used types
pub use codec::{build_request, parse_response, Request, ResponseHead, Termination};
pub use target::ProxyTarget;
pub use transport::{BlockingGuard, TunnelConnection};

// packages/engine/src/tunnel/target.rs
//! Proxy target resolution
//!
//! The only accepted forms are `http://localhost:<port>` and
//! `http://127.0.0.1:<port>`. Anything else yields no target, which keeps the
//! shim switched off.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

const ACCEPTED_PREFIXES: [&str; 2] = ["http://localhost:", "http://127.0.0.1:"];

/// Local proxy endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyTarget {
    port: u16,
}

impl ProxyTarget {
    /// Address the proxy is always reached on
    pub const HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

    /// Create a target for a known port; port 0 is not a target
    pub fn new(port: u16) -> Option<Self> {
        (port != 0).then_some(Self { port })
    }

    /// Parse a proxy URL
    pub fn parse(url: &str) -> Option<Self> {
        let Some(rest) = ACCEPTED_PREFIXES
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix))
        else {
            debug!("Proxy URL {:?} has an unsupported prefix", url);
            return None;
        };

        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            debug!("Proxy URL {:?} has no decimal port", url);
            return None;
        }

        rest.parse::<u16>().ok().and_then(Self::new)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address of the proxy
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Self::HOST, self.port)
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Self::HOST, self.port)
    }
}

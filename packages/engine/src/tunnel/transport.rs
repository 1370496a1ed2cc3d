// packages/engine/src/tunnel/transport.rs
//! Tunnel transport: one socket, one exchange
//!
//! A [`TunnelConnection`] either owns its socket (RESOLVE path, allocated on
//! demand and closed on drop) or borrows the caller's descriptor (CONNECT path,
//! never closed here). The proxy is always reached through the injected real
//! `connect` primitive so the shim never re-enters itself.

use crate::interception::primitives::NetPrimitives;
use crate::tunnel::codec::{build_request, parse_response, ResponseHead, Termination};
use crate::tunnel::target::ProxyTarget;
use crate::utils::errors::{HookError, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{send, socket, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrIn, SockaddrLike};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SOCKET_FLAGS: SockFlag = SockFlag::SOCK_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SOCKET_FLAGS: SockFlag = SockFlag::empty();

// A vanished proxy must not deliver SIGPIPE to the host program.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = MsgFlags::empty();

enum Descriptor {
    Owned(OwnedFd),
    Borrowed(RawFd),
}

impl Descriptor {
    fn raw(&self) -> RawFd {
        match self {
            Descriptor::Owned(fd) => fd.as_raw_fd(),
            Descriptor::Borrowed(fd) => *fd,
        }
    }
}

/// A single-use connection to the proxy
pub struct TunnelConnection<'p, P: NetPrimitives + ?Sized> {
    descriptor: Option<Descriptor>,
    connected: bool,
    target: ProxyTarget,
    primitives: &'p P,
    read_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl<'p, P: NetPrimitives + ?Sized> TunnelConnection<'p, P> {
    /// Connection that allocates and owns its socket
    pub fn new(target: ProxyTarget, primitives: &'p P) -> Self {
        Self {
            descriptor: None,
            connected: false,
            target,
            primitives,
            read_timeout: None,
            deadline: None,
        }
    }

    /// Connection over a caller-owned descriptor, left open on drop
    pub fn borrowed(fd: RawFd, target: ProxyTarget, primitives: &'p P) -> Self {
        Self {
            descriptor: Some(Descriptor::Borrowed(fd)),
            ..Self::new(target, primitives)
        }
    }

    /// Bound the time spent waiting for the proxy's response
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn owns_descriptor(&self) -> bool {
        matches!(self.descriptor, Some(Descriptor::Owned(_)))
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open a socket unless one is already held
    pub fn acquire(&mut self) -> Result<RawFd> {
        if let Some(descriptor) = &self.descriptor {
            return Ok(descriptor.raw());
        }

        let fd = socket(AddressFamily::Inet, SockType::Stream, SOCKET_FLAGS, None)
            .map_err(HookError::Socket)?;
        let raw = fd.as_raw_fd();
        self.descriptor = Some(Descriptor::Owned(fd));
        Ok(raw)
    }

    /// Connect the held socket to the proxy unless already connected
    pub fn connect(&mut self) -> Result<()> {
        let fd = self.acquire()?;
        if self.connected {
            return Ok(());
        }

        let addr = SockaddrIn::from(self.target.socket_addr());
        let rc = unsafe { self.primitives.connect(fd, addr.as_ptr(), addr.len()) };
        if rc < 0 {
            let errno = Errno::last();
            debug!("Failed to connect fd {} to proxy {}: {}", fd, self.target, errno);
            return Err(HookError::ProxyUnreachable(errno));
        }

        self.connected = true;
        Ok(())
    }

    /// Clear `O_NONBLOCK` until the returned guard is dropped
    pub fn force_blocking(&mut self) -> Result<BlockingGuard> {
        let fd = self.acquire()?;
        BlockingGuard::new(fd)
    }

    /// Send one request and read the response header block
    ///
    /// A response cut short by end of stream or a read error is returned as-is;
    /// only an expired read deadline fails the exchange.
    pub fn exchange(&mut self, verb: &str, path: &str, host: &str) -> Result<ResponseHead> {
        self.connect()?;

        let request = build_request(verb, path, host);
        if request.is_truncated() {
            warn!("{} request for {} truncated to {} bytes", verb, host, request.as_bytes().len());
        }
        self.send_all(request.as_bytes())?;
        debug!("send({}) -> {} {} ({} bytes)", verb, path, host, request.as_bytes().len());

        self.deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);
        let head = parse_response(self);

        debug!(
            "Response: {:?} ({} lines, {:?})",
            head.status_line(),
            head.lines(),
            head.termination()
        );
        for (key, value) in head.headers() {
            trace!(
                "  '{}'='{}'",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
        }

        match head.termination() {
            Termination::ReadError(io::ErrorKind::TimedOut) => {
                Err(HookError::Timeout(self.read_timeout.unwrap_or_default()))
            }
            _ => Ok(head),
        }
    }

    fn send_all(&self, mut bytes: &[u8]) -> Result<()> {
        let fd = self.raw_fd().ok_or(HookError::SendFailed(Errno::EBADF))?;

        while !bytes.is_empty() {
            match send(fd, bytes, SEND_FLAGS) {
                Ok(0) => return Err(HookError::SendFailed(Errno::EPIPE)),
                Ok(sent) => bytes = &bytes[sent..],
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(HookError::SendFailed(errno)),
            }
        }
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.descriptor.as_ref().map(Descriptor::raw)
    }

    fn wait_readable(&self, fd: RawFd) -> io::Result<()> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::ErrorKind::TimedOut.into());
        }

        let timeout_ms = remaining.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        match unsafe { libc::poll(&mut pollfd, 1, timeout_ms) } {
            rc if rc < 0 => Err(io::Error::last_os_error()),
            0 => Err(io::ErrorKind::TimedOut.into()),
            _ => Ok(()),
        }
    }
}

impl<P: NetPrimitives + ?Sized> Read for TunnelConnection<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self
            .raw_fd()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.wait_readable(fd)?;
        nix::unistd::read(fd, buf).map_err(io::Error::from)
    }
}

/// Scoped blocking mode for a descriptor
///
/// Snapshots the file status flags, clears `O_NONBLOCK` if it was set and puts
/// the snapshot back on drop.
pub struct BlockingGuard {
    fd: RawFd,
    saved: OFlag,
}

impl BlockingGuard {
    pub fn new(fd: RawFd) -> Result<Self> {
        let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(HookError::Socket)?;
        let saved = OFlag::from_bits_retain(bits);

        if saved.contains(OFlag::O_NONBLOCK) {
            fcntl(fd, FcntlArg::F_SETFL(saved.difference(OFlag::O_NONBLOCK)))
                .map_err(HookError::Socket)?;
            trace!("fd {} switched to blocking mode", fd);
        }

        Ok(Self { fd, saved })
    }

    /// Flags captured before blocking mode was forced
    pub fn saved_flags(&self) -> OFlag {
        self.saved
    }
}

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        if !self.saved.contains(OFlag::O_NONBLOCK) {
            return;
        }
        if let Err(errno) = fcntl(self.fd, FcntlArg::F_SETFL(self.saved)) {
            warn!("Failed to restore flags on fd {}: {}", self.fd, errno);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::primitives::SystemPrimitives;
    use crate::test_support::{nonblocking_tcp_socket, status_flags, unused_target, FakeProxy};

    const RESOLVED: &[u8] = b"HTTP/1.1 200 OK\r\nHost: 10.0.0.5\r\n\r\n";

    #[test]
    fn test_owned_exchange() {
        let proxy = FakeProxy::respond(RESOLVED);
        let mut tunnel = TunnelConnection::new(proxy.target(), &SystemPrimitives);
        assert!(!tunnel.owns_descriptor());

        let head = tunnel.exchange("RESOLVE", "*", "example.com").unwrap();
        assert!(tunnel.owns_descriptor());
        assert!(tunnel.is_connected());
        assert_eq!(head.get_header("Host"), Some("10.0.0.5"));

        drop(tunnel);
        assert_eq!(
            proxy.request().unwrap(),
            b"RESOLVE * HTTP/1.1\r\nHost: example.com\r\n\r\n"
        );
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let target = ProxyTarget::new(9).unwrap();
        let mut tunnel = TunnelConnection::new(target, &SystemPrimitives);

        let first = tunnel.acquire().unwrap();
        let second = tunnel.acquire().unwrap();
        assert_eq!(first, second);
        assert!(!tunnel.is_connected());
    }

    #[test]
    fn test_unreachable_proxy() {
        let mut tunnel = TunnelConnection::new(unused_target(), &SystemPrimitives);

        let err = tunnel.exchange("RESOLVE", "*", "example.com").unwrap_err();
        assert!(matches!(err, HookError::ProxyUnreachable(Errno::ECONNREFUSED)));
        assert!(!tunnel.is_connected());
    }

    #[test]
    fn test_borrowed_descriptor_stays_open() {
        let proxy = FakeProxy::respond(RESOLVED);
        let socket = nonblocking_tcp_socket();
        let fd = socket.as_raw_fd();

        {
            let mut tunnel = TunnelConnection::borrowed(fd, proxy.target(), &SystemPrimitives);
            assert!(!tunnel.owns_descriptor());
            let _blocking = tunnel.force_blocking().unwrap();
            tunnel.exchange("CONNECT", "1.2.3.4:80", "1.2.3.4:80").unwrap();
        }

        assert!(fcntl(fd, FcntlArg::F_GETFL).is_ok());
        assert_eq!(
            proxy.request().unwrap(),
            b"CONNECT 1.2.3.4:80 HTTP/1.1\r\nHost: 1.2.3.4:80\r\n\r\n"
        );
    }

    #[test]
    fn test_blocking_guard_restores_flags() {
        let socket = nonblocking_tcp_socket();
        let fd = socket.as_raw_fd();
        let before = status_flags(fd);
        assert!(OFlag::from_bits_retain(before).contains(OFlag::O_NONBLOCK));

        {
            let guard = BlockingGuard::new(fd).unwrap();
            assert_eq!(guard.saved_flags().bits(), before);
            assert!(!OFlag::from_bits_retain(status_flags(fd)).contains(OFlag::O_NONBLOCK));
        }

        assert_eq!(status_flags(fd), before);
    }

    #[test]
    fn test_blocking_guard_leaves_blocking_socket() {
        let socket = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None).unwrap();
        let fd = socket.as_raw_fd();
        let before = status_flags(fd);

        drop(BlockingGuard::new(fd).unwrap());
        assert_eq!(status_flags(fd), before);
    }

    #[test]
    fn test_blocking_guard_rejects_bad_descriptor() {
        let err = BlockingGuard::new(-1).err().unwrap();
        assert!(matches!(err, HookError::Socket(Errno::EBADF)));
    }

    #[test]
    fn test_read_timeout() {
        let proxy = FakeProxy::silent(Duration::from_secs(2));
        let mut tunnel = TunnelConnection::new(proxy.target(), &SystemPrimitives)
            .with_read_timeout(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let err = tunnel.exchange("RESOLVE", "*", "slow.example").unwrap_err();

        assert!(matches!(err, HookError::Timeout(_)));
        assert_eq!(err.errno(), Errno::ETIMEDOUT);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_closed_response_is_not_an_error() {
        let proxy = FakeProxy::respond(b"HTTP/1.1 200 OK\r\nHost: 10.");
        let mut tunnel = TunnelConnection::new(proxy.target(), &SystemPrimitives);

        let head = tunnel.exchange("RESOLVE", "*", "cut.example").unwrap();
        assert_eq!(head.termination(), Termination::EndOfStream);
        assert_eq!(head.get_header("Host"), None);
    }
}

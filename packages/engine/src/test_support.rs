// packages/engine/src/test_support.rs
//! Loopback fake proxy and recording primitives shared by the unit tests

use crate::interception::primitives::{NetPrimitives, SystemPrimitives};
use crate::tunnel::target::ProxyTarget;
use libc::{addrinfo, c_char, c_int, sockaddr, sockaddr_in, socklen_t};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use std::ffi::CStr;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_WINDOW: Duration = Duration::from_secs(10);

enum Behavior {
    Respond(&'static [u8]),
    Silent(Duration),
}

/// One-shot proxy on 127.0.0.1 that records the request it receives
pub struct FakeProxy {
    port: u16,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Option<Vec<u8>>>,
}

impl FakeProxy {
    /// Answer the first request with `response`, then close
    pub fn respond(response: &'static [u8]) -> Self {
        Self::spawn(Behavior::Respond(response))
    }

    /// Read the first request and stay silent for `hold`
    pub fn silent(hold: Duration) -> Self {
        Self::spawn(Behavior::Silent(hold))
    }

    fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let stream = accept_until_stopped(&listener, &stop_flag)?;
            serve(stream, behavior).ok()
        });

        Self { port, stop, handle }
    }

    pub fn target(&self) -> ProxyTarget {
        ProxyTarget::new(self.port).unwrap()
    }

    /// The request bytes, or `None` if nobody connected
    ///
    /// Call after the code under test returned: a connection already queued on
    /// the listener is still picked up.
    pub fn request(self) -> Option<Vec<u8>> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().unwrap()
    }
}

fn accept_until_stopped(listener: &TcpListener, stop: &AtomicBool) -> Option<TcpStream> {
    let started = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if stop.load(Ordering::SeqCst) || started.elapsed() > ACCEPT_WINDOW {
                    return None;
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

fn serve(mut stream: TcpStream, behavior: Behavior) -> io::Result<Vec<u8>> {
    stream.set_nonblocking(false)?;

    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte)? == 0 {
            break;
        }
        request.push(byte[0]);
    }

    match behavior {
        Behavior::Respond(response) => stream.write_all(response)?,
        Behavior::Silent(hold) => thread::sleep(hold),
    }
    Ok(request)
}

/// A port on 127.0.0.1 nothing listens on
pub fn unused_target() -> ProxyTarget {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ProxyTarget::new(port).unwrap()
}

pub fn nonblocking_tcp_socket() -> OwnedFd {
    let fd = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None).unwrap();
    let flags = OFlag::from_bits_retain(status_flags(fd.as_raw_fd()));
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).unwrap();
    fd
}

pub fn status_flags(fd: RawFd) -> c_int {
    fcntl(fd, FcntlArg::F_GETFL).unwrap()
}

#[derive(Debug, Clone)]
struct RecordedLookup {
    node: String,
    hint_family: Option<c_int>,
}

/// Real libc primitives that remember how they were called
///
/// `getaddrinfo` is never forwarded: it returns the configured code and leaves
/// `*res` null, so tests do not depend on the host's resolver.
#[derive(Default)]
pub struct RecordingPrimitives {
    connects: Mutex<Vec<(c_int, Option<SocketAddrV4>)>>,
    lookups: Mutex<Vec<RecordedLookup>>,
    lookup_rc: c_int,
}

impl RecordingPrimitives {
    pub fn failing_lookups(rc: c_int) -> Self {
        Self {
            lookup_rc: rc,
            ..Default::default()
        }
    }

    pub fn families(&self) -> Vec<c_int> {
        self.connects.lock().unwrap().iter().map(|(family, _)| *family).collect()
    }

    pub fn connected_v4(&self) -> Vec<SocketAddrV4> {
        self.connects.lock().unwrap().iter().filter_map(|(_, addr)| *addr).collect()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().iter().map(|l| l.node.clone()).collect()
    }

    pub fn lookup_hint_families(&self) -> Vec<Option<c_int>> {
        self.lookups.lock().unwrap().iter().map(|l| l.hint_family).collect()
    }
}

impl NetPrimitives for RecordingPrimitives {
    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        if addr.is_null() {
            return SystemPrimitives.connect(fd, addr, len);
        }
        let family = c_int::from((*addr).sa_family);
        let v4 = (family == libc::AF_INET).then(|| {
            let sin = std::ptr::read_unaligned(addr.cast::<sockaddr_in>());
            SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )
        });
        self.connects.lock().unwrap().push((family, v4));
        SystemPrimitives.connect(fd, addr, len)
    }

    unsafe fn getaddrinfo(
        &self,
        node: *const c_char,
        _service: *const c_char,
        hints: *const addrinfo,
        res: *mut *mut addrinfo,
    ) -> c_int {
        let node = if node.is_null() {
            "(null)".to_string()
        } else {
            CStr::from_ptr(node).to_string_lossy().into_owned()
        };
        let hint_family = (!hints.is_null()).then(|| (*hints).ai_family);
        self.lookups.lock().unwrap().push(RecordedLookup { node, hint_family });
        if !res.is_null() {
            *res = std::ptr::null_mut();
        }
        self.lookup_rc
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
        SystemPrimitives.getnameinfo(addr, addrlen, host, hostlen, serv, servlen, flags)
    }
}

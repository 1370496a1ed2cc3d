// packages/engine/src/tunnel/codec.rs
//! Request framing and in-place response header parsing
//!
//! Both directions work on fixed 1024-byte buffers and never allocate:
//!
//! - Requests are formatted into a stack buffer and truncated past 1023 bytes.
//! - Responses are read one byte at a time into a buffer owned by
//!   [`ResponseHead`]; keys and values are spans into that buffer.
//!
//! Reading a single byte at a time matters for `CONNECT`: the parser must not
//! consume any tunneled payload that follows the header block.

use std::fmt;
use std::io::{self, Read, Write};
use std::str;

/// Size of the request and response buffers
pub const BUFFER_SIZE: usize = 1024;

/// Number of line slots, slot 0 being the status line
pub const MAX_LINES: usize = 32;

// One byte is kept back, as with a NUL-terminated C buffer.
const PARSE_LIMIT: usize = BUFFER_SIZE - 1;

/// A framed request ready to be written to the proxy
pub struct Request {
    buf: [u8; BUFFER_SIZE],
    len: usize,
    truncated: bool,
}

impl Request {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Whether the formatted request did not fit the buffer
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Format `"<verb> <path> HTTP/1.1\r\nHost: <host>\r\n\r\n"`
pub fn build_request(verb: &str, path: &str, host: &str) -> Request {
    let mut buf = [0u8; BUFFER_SIZE];
    let (len, truncated) = {
        let mut out = &mut buf[..PARSE_LIMIT];
        // Writing into a slice only fails once it is full.
        let truncated = write!(out, "{} {} HTTP/1.1\r\nHost: {}\r\n\r\n", verb, path, host).is_err();
        (PARSE_LIMIT - out.len(), truncated)
    };
    Request { buf, len, truncated }
}

/// Why parsing stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A blank line ended the header block
    BlankLine,

    /// The peer closed the stream first
    EndOfStream,

    /// 1023 bytes were stored without a blank line
    BufferFull,

    /// Every line slot was used
    HeaderLimit,

    /// Reading failed
    ReadError(io::ErrorKind),
}

/// Parsed response header block
///
/// Line `i` covers `starts[i]..end(i)`. Lines `0..lines` are terminated; line
/// `lines` is whatever was being read when parsing stopped.
pub struct ResponseHead {
    buf: [u8; BUFFER_SIZE],
    len: usize,
    lines: usize,
    starts: [usize; MAX_LINES],
    ends: [usize; MAX_LINES],
    colons: [Option<usize>; MAX_LINES],
    termination: Termination,
}

impl ResponseHead {
    fn empty() -> Self {
        Self {
            buf: [0; BUFFER_SIZE],
            len: 0,
            lines: 0,
            starts: [0; MAX_LINES],
            ends: [0; MAX_LINES],
            colons: [None; MAX_LINES],
            termination: Termination::EndOfStream,
        }
    }

    fn line_end(&self, line: usize) -> usize {
        if line < self.lines {
            self.ends[line]
        } else {
            self.len
        }
    }

    fn key_span(&self, line: usize) -> (usize, usize) {
        let end = self.line_end(line);
        (self.starts[line], self.colons[line].map_or(end, |colon| colon.min(end)))
    }

    fn key(&self, line: usize) -> &[u8] {
        let (start, end) = self.key_span(line);
        &self.buf[start..end]
    }

    fn value(&self, line: usize) -> &[u8] {
        let end = self.line_end(line);
        match self.colons[line] {
            // The value skips ": "; a bare "Key:" has an empty value.
            Some(colon) => &self.buf[(colon + 2).min(end)..end],
            None => &[],
        }
    }

    fn blank_line_completed(&self) -> bool {
        if self.lines <= 1 {
            return false;
        }
        let (start, end) = self.key_span(self.lines - 1);
        start == end
    }

    /// Look up a header by exact, case-sensitive key
    ///
    /// Only the first matching line counts, and an empty value is reported as
    /// absent.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        let line = (1..self.lines).find(|&line| self.key(line) == key.as_bytes())?;
        let value = self.value(line);
        if value.is_empty() {
            return None;
        }
        str::from_utf8(value).ok()
    }

    /// Non-blank header lines as raw key/value pairs
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        (1..self.lines)
            .filter(move |&line| !self.key(line).is_empty())
            .map(move |line| (self.key(line), self.value(line)))
    }

    /// The first response line, for diagnostics only
    pub fn status_line(&self) -> String {
        let end = if self.lines > 0 { self.ends[0] } else { self.len };
        String::from_utf8_lossy(&self.buf[..end]).into_owned()
    }

    /// Number of completed lines
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Number of bytes stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }
}

impl fmt::Debug for ResponseHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHead")
            .field("status_line", &self.status_line())
            .field("len", &self.len)
            .field("lines", &self.lines)
            .field("termination", &self.termination)
            .finish()
    }
}

/// Read and tokenize a response header block, one byte at a time
pub fn parse_response<R: Read + ?Sized>(reader: &mut R) -> ResponseHead {
    let mut head = ResponseHead::empty();
    let mut byte = [0u8; 1];

    loop {
        if head.len >= PARSE_LIMIT {
            head.termination = Termination::BufferFull;
            break;
        }

        match reader.read(&mut byte) {
            Ok(0) => {
                head.termination = Termination::EndOfStream;
                break;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                head.termination = Termination::ReadError(e.kind());
                break;
            }
        }

        let p = head.len;
        match byte[0] {
            b'\r' => continue,
            b'\n' => {
                head.ends[head.lines] = p;
                head.lines += 1;
                if head.lines < MAX_LINES {
                    head.starts[head.lines] = p + 1;
                }
            }
            b':' => {
                if head.colons[head.lines].is_none() {
                    head.colons[head.lines] = Some(p);
                }
            }
            _ => {}
        }
        head.buf[p] = byte[0];
        head.len += 1;

        if head.blank_line_completed() {
            head.termination = Termination::BlankLine;
            break;
        }
        if head.lines >= MAX_LINES {
            head.termination = Termination::HeaderLimit;
            break;
        }
    }

    head
}

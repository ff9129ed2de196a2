//! C2 — HTTP Parser Adapter.
//!
//! Wraps `httparse` (a streaming-friendly, but headers-only, HTTP/1.1
//! parser) and adds the body-framing state machine (`Content-Length` or
//! `Transfer-Encoding: chunked`) that `httparse` itself does not implement,
//! presenting the uniform event set spec.md §4.2 describes: `on_message_begin`,
//! `on_url`, `on_header`, `on_headers_complete`, `on_body`,
//! `on_message_complete`, `on_upgrade`.
//!
//! Grounded on `original_source/roll/socket.py::HTTPParser` (the callback
//! shape) and on the teacher's own use of `httparse` as a workspace
//! dependency (`ext/http/Cargo.toml`).

use crate::error::ParseError;
use bytes::{Buf, BytesMut};

/// Structured events emitted by [`HttpParser::feed`]. A connection drives its
/// own state machine from these, exactly as the Python original's
/// `HTTPProtocol.on_*` methods do.
pub trait ParserSink {
    fn on_message_begin(&mut self) {}
    fn on_url(&mut self, _url: &[u8]) {}
    /// Header name is normalized to ASCII upper-case before this is called.
    fn on_header(&mut self, _name: &[u8], _value: &[u8]) {}
    fn on_headers_complete(&mut self) {}
    fn on_body(&mut self, _chunk: &[u8]) {}
    fn on_message_complete(&mut self) {}
    /// Raised once, when the parser detects an `Upgrade` header at the end
    /// of the headers section.
    fn on_upgrade(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    None,
    Fixed(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataCrlf,
    TrailerCrlf,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body,
    MessageComplete,
}

/// Incremental HTTP/1.1 request parser/body-framer for one connection.
///
/// One instance is reused across the keep-alive lifetime of a connection;
/// call [`HttpParser::reset`] between messages.
pub struct HttpParser {
    state: State,
    head_buf: BytesMut,
    body_mode: BodyMode,
    chunk_state: ChunkState,
    remaining: u64,
    method: Vec<u8>,
    http_minor: u8,
    keep_alive: bool,
    upgrade_requested: bool,
    max_header_bytes: usize,
}

impl HttpParser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            state: State::Head,
            head_buf: BytesMut::new(),
            body_mode: BodyMode::None,
            chunk_state: ChunkState::Size,
            remaining: 0,
            method: Vec::new(),
            http_minor: 1,
            keep_alive: true,
            upgrade_requested: false,
            max_header_bytes,
        }
    }

    /// Valid after `on_headers_complete`: the HTTP method token, upper-case.
    pub fn get_method(&self) -> &[u8] {
        &self.method
    }

    /// Valid after `on_headers_complete`.
    pub fn should_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn is_message_complete(&self) -> bool {
        self.state == State::MessageComplete
    }

    pub fn upgrade_requested(&self) -> bool {
        self.upgrade_requested
    }

    /// Reset for the next message on the same (keep-alive) connection.
    pub fn reset(&mut self) {
        self.state = State::Head;
        self.head_buf.clear();
        self.body_mode = BodyMode::None;
        self.chunk_state = ChunkState::Size;
        self.remaining = 0;
        self.method.clear();
        self.upgrade_requested = false;
        // `keep_alive` and `http_minor` get recomputed from the next head.
    }

    /// Feed newly-received bytes. May invoke any number of sink callbacks,
    /// including zero (if more data is needed) or several (a full message in
    /// one call). Any bytes left over once the message completes (the start
    /// of a pipelined request, or the first bytes of an upgraded protocol)
    /// are returned to the caller rather than consumed.
    pub fn feed(&mut self, data: &[u8], sink: &mut impl ParserSink) -> Result<BytesMut, ParseError> {
        let mut buf = if self.head_buf.is_empty() {
            BytesMut::from(data)
        } else {
            let mut combined = std::mem::take(&mut self.head_buf);
            combined.extend_from_slice(data);
            combined
        };

        loop {
            match self.state {
                State::Head => match self.try_parse_head(&buf, sink)? {
                    Some(consumed) => buf.advance(consumed),
                    None => {
                        if buf.len() > self.max_header_bytes {
                            return Err(ParseError::HeadersTooLarge);
                        }
                        self.head_buf = buf;
                        return Ok(BytesMut::new());
                    }
                },
                State::Body => {
                    if buf.is_empty() {
                        return Ok(BytesMut::new());
                    }
                    let consumed = self.feed_body(&buf, sink)?;
                    buf.advance(consumed);
                    if matches!(self.state, State::Body) {
                        return Ok(BytesMut::new());
                    }
                }
                State::MessageComplete => {
                    return Ok(buf);
                }
            }
        }
    }

    /// Attempt to parse a full request line + headers block out of `buf`.
    /// Returns `Some(bytes_consumed)` on success, `None` if more data is
    /// needed.
    fn try_parse_head(&mut self, buf: &BytesMut, sink: &mut impl ParserSink) -> Result<Option<usize>, ParseError> {
        let Some(head_end) = find_double_crlf(buf) else {
            return Ok(None);
        };

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        let head_bytes = &buf[..head_end];
        match req.parse(head_bytes).map_err(ParseError::Malformed)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(ParseError::InvalidRequestLine),
        }

        sink.on_message_begin();

        let method = req.method.ok_or(ParseError::InvalidRequestLine)?;
        self.method = method.as_bytes().to_ascii_uppercase();
        self.http_minor = req.version.unwrap_or(1);

        let path = req.path.ok_or(ParseError::InvalidRequestLine)?;
        sink.on_url(path.as_bytes());

        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        let mut connection_close = self.http_minor == 0;
        let mut connection_keep_alive = false;
        let mut has_upgrade = false;

        for header in req.headers.iter() {
            let name_upper = header.name.as_bytes().to_ascii_uppercase();
            sink.on_header(&name_upper, header.value);
            match name_upper.as_slice() {
                b"CONTENT-LENGTH" => {
                    let v = std::str::from_utf8(header.value)
                        .ok()
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .ok_or(ParseError::InvalidRequestLine)?;
                    content_length = Some(v);
                }
                b"TRANSFER-ENCODING" => {
                    if header.value.to_ascii_lowercase().windows(7).any(|w| w == b"chunked") {
                        chunked = true;
                    }
                }
                b"CONNECTION" => {
                    let v = header.value.to_ascii_lowercase();
                    if contains_token(&v, b"close") {
                        connection_close = true;
                    }
                    if contains_token(&v, b"keep-alive") {
                        connection_keep_alive = true;
                    }
                    if contains_token(&v, b"upgrade") {
                        has_upgrade = true;
                    }
                }
                b"UPGRADE" => {
                    has_upgrade = true;
                }
                _ => {}
            }
        }

        self.keep_alive = if self.http_minor == 0 {
            connection_keep_alive && !connection_close
        } else {
            !connection_close
        };

        self.body_mode = if chunked {
            BodyMode::Chunked
        } else if let Some(len) = content_length {
            BodyMode::Fixed(len)
        } else {
            BodyMode::None
        };
        self.remaining = match self.body_mode {
            BodyMode::Fixed(n) => n,
            _ => 0,
        };
        self.chunk_state = ChunkState::Size;

        sink.on_headers_complete();

        if has_upgrade {
            self.upgrade_requested = true;
            sink.on_upgrade();
            self.state = State::MessageComplete;
            sink.on_message_complete();
        } else if matches!(self.body_mode, BodyMode::None) {
            self.state = State::MessageComplete;
            sink.on_message_complete();
        } else {
            self.state = State::Body;
        }

        Ok(Some(head_end))
    }

    /// Consume as much body as `buf` allows. Returns the number of bytes
    /// consumed; the caller advances its cursor by that amount.
    fn feed_body(&mut self, buf: &BytesMut, sink: &mut impl ParserSink) -> Result<usize, ParseError> {
        match self.body_mode {
            BodyMode::Fixed(_) => {
                let take = self.remaining.min(buf.len() as u64) as usize;
                if take > 0 {
                    sink.on_body(&buf[..take]);
                    self.remaining -= take as u64;
                }
                if self.remaining == 0 {
                    self.state = State::MessageComplete;
                    sink.on_message_complete();
                }
                Ok(take)
            }
            BodyMode::UntilClose => {
                if !buf.is_empty() {
                    sink.on_body(buf);
                }
                Ok(buf.len())
            }
            BodyMode::Chunked => self.feed_chunked(buf, sink),
            BodyMode::None => {
                self.state = State::MessageComplete;
                sink.on_message_complete();
                Ok(0)
            }
        }
    }

    fn feed_chunked(&mut self, buf: &BytesMut, sink: &mut impl ParserSink) -> Result<usize, ParseError> {
        let mut pos = 0usize;
        loop {
            let rest = &buf[pos..];
            match self.chunk_state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(rest) else {
                        return Ok(pos);
                    };
                    let line = &rest[..line_end];
                    let size_str = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size = std::str::from_utf8(size_str)
                        .ok()
                        .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
                        .ok_or(ParseError::InvalidRequestLine)?;
                    pos += line_end + 2;
                    self.chunk_state = if size == 0 {
                        ChunkState::TrailerCrlf
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    let take = remaining.min(rest.len() as u64) as usize;
                    if take > 0 {
                        sink.on_body(&rest[..take]);
                        pos += take;
                    }
                    let left = remaining - take as u64;
                    if left == 0 {
                        self.chunk_state = ChunkState::DataCrlf;
                    } else {
                        self.chunk_state = ChunkState::Data(left);
                        return Ok(pos);
                    }
                }
                ChunkState::DataCrlf => {
                    if rest.len() < 2 {
                        return Ok(pos);
                    }
                    pos += 2;
                    self.chunk_state = ChunkState::Size;
                }
                ChunkState::TrailerCrlf => {
                    // Trailers are not surfaced; scan past them.
                    let Some(line_end) = find_crlf(rest) else {
                        return Ok(pos);
                    };
                    if line_end == 0 {
                        pos += 2;
                        self.chunk_state = ChunkState::Done;
                    } else {
                        pos += line_end + 2;
                    }
                }
                ChunkState::Done => {
                    self.state = State::MessageComplete;
                    sink.on_message_complete();
                    return Ok(pos);
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn contains_token(haystack: &[u8], token: &[u8]) -> bool {
    haystack.split(|&b| b == b',').any(|part| {
        let trimmed = trim_ascii(part);
        trimmed.eq_ignore_ascii_case(token)
    })
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        urls: Vec<Vec<u8>>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
        body: Vec<u8>,
        headers_complete: bool,
        message_complete: bool,
        message_begin: usize,
        upgrade: bool,
    }

    impl ParserSink for Recorder {
        fn on_message_begin(&mut self) {
            self.message_begin += 1;
        }
        fn on_url(&mut self, url: &[u8]) {
            self.urls.push(url.to_vec());
        }
        fn on_header(&mut self, name: &[u8], value: &[u8]) {
            self.headers.push((name.to_vec(), value.to_vec()));
        }
        fn on_headers_complete(&mut self) {
            self.headers_complete = true;
        }
        fn on_body(&mut self, chunk: &[u8]) {
            self.body.extend_from_slice(chunk);
        }
        fn on_message_complete(&mut self) {
            self.message_complete = true;
        }
        fn on_upgrade(&mut self) {
            self.upgrade = true;
        }
    }

    #[test]
    fn parses_simple_get() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        let req = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let leftover = p.feed(req, &mut r).unwrap();
        assert!(leftover.is_empty());
        assert_eq!(r.urls[0], b"/hello");
        assert!(r.headers_complete);
        assert!(r.message_complete);
        assert_eq!(p.get_method(), b"GET");
        assert!(p.should_keep_alive());
    }

    #[test]
    fn parses_fixed_length_body_across_feeds() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        let leftover = p
            .feed(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel", &mut r)
            .unwrap();
        assert!(leftover.is_empty());
        assert!(!r.message_complete);
        let leftover2 = p.feed(b"lo", &mut r).unwrap();
        assert!(leftover2.is_empty());
        assert!(r.message_complete);
        assert_eq!(r.body, b"hello");
    }

    #[test]
    fn parses_chunked_body() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        p.feed(
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n2\r\ncd\r\n0\r\n\r\n",
            &mut r,
        )
        .unwrap();
        assert!(r.message_complete);
        assert_eq!(r.body, b"abcd");
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        p.feed(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", &mut r).unwrap();
        assert!(!p.should_keep_alive());
    }

    #[test]
    fn http_1_0_defaults_to_close() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        p.feed(b"GET / HTTP/1.0\r\n\r\n", &mut r).unwrap();
        assert!(!p.should_keep_alive());
    }

    #[test]
    fn keep_alive_reuse_after_reset() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        p.feed(b"GET /a HTTP/1.1\r\n\r\n", &mut r).unwrap();
        assert!(r.message_complete);
        p.reset();
        let mut r2 = Recorder::default();
        p.feed(b"GET /b HTTP/1.1\r\n\r\n", &mut r2).unwrap();
        assert_eq!(r2.urls[0], b"/b");
    }

    #[test]
    fn pipelined_requests_return_leftover_bytes() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        let leftover = p
            .feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n", &mut r)
            .unwrap();
        assert!(r.message_complete);
        assert_eq!(&leftover[..], b"GET /b HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn upgrade_header_emits_event_and_stops_framing() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        let leftover = p
            .feed(
                b"GET /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
                &mut r,
            )
            .unwrap();
        assert!(r.upgrade);
        assert!(p.upgrade_requested());
        assert!(leftover.is_empty());
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        let mut p = HttpParser::new(64 * 1024);
        let mut r = Recorder::default();
        let err = p.feed(b"NOT A REQUEST\r\n\r\n", &mut r);
        assert!(err.is_err());
    }
}

//! Bundled HTTP/1.x request tokenizer built on `httparse`.
//!
//! Header bytes are buffered across `execute` calls until `httparse` reports
//! a complete header section; URL and header events are then replayed into
//! the sink and the remaining bytes flow through a body framer. The
//! tokenizer stops consuming at message end, leaving pipelined bytes for the
//! caller.

use bytes::BytesMut;
use httparse::Status;
use tracing::trace;

use crate::tokenizer::framing::{BodyItem, ChunkedFramer, LengthFramer};
use crate::tokenizer::{TokenSink, Tokenizer};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug)]
enum Phase {
    Headers,
    Body(BodyFramer),
    Complete,
}

#[derive(Debug)]
enum BodyFramer {
    Length(LengthFramer),
    Chunked(ChunkedFramer),
}

/// HTTP/1.x request tokenizer.
///
/// Implements [`Tokenizer`] for request messages. Keep-alive is derived from
/// the HTTP version and the `Connection` header once the header section has
/// been seen; the upgrade flag is raised when the request carries an
/// `Upgrade` header, without acting on it.
#[derive(Debug)]
pub struct H1Tokenizer {
    phase: Phase,
    /// Partial header bytes carried between execute calls
    buffer: BytesMut,
    keep_alive: bool,
    upgrade: bool,
    started: bool,
}

impl H1Tokenizer {
    /// Creates a tokenizer for request messages.
    pub fn request() -> Self {
        Self { phase: Phase::Headers, buffer: BytesMut::new(), keep_alive: false, upgrade: false, started: false }
    }

    /// Parses the buffered header section, emitting events on completion.
    ///
    /// Returns the next phase and the body bytes trailing the header
    /// section, or `None` when the section is still incomplete or invalid.
    fn tokenize_headers(&mut self, sink: &mut dyn TokenSink) -> Option<Result<(Phase, BytesMut), ()>> {
        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut header_storage);

        let body_offset = match req.parse(&self.buffer) {
            Ok(Status::Complete(body_offset)) => body_offset,
            Ok(Status::Partial) => {
                if self.buffer.len() > MAX_HEADER_BYTES {
                    trace!(size = self.buffer.len(), "header section exceeds limit");
                    return Some(Err(()));
                }
                return None;
            }
            Err(e) => {
                trace!(cause = %e, "malformed header section");
                return Some(Err(()));
            }
        };

        if body_offset > MAX_HEADER_BYTES {
            trace!(size = body_offset, "header section exceeds limit");
            return Some(Err(()));
        }

        let minor = u16::from(req.version.unwrap_or(1));
        let headers = &req.headers[..];

        let framer = match body_framing(headers) {
            Ok(framer) => framer,
            Err(()) => return Some(Err(())),
        };

        self.keep_alive = connection_keep_alive(minor, headers);
        self.upgrade = headers.iter().any(|h| h.name.eq_ignore_ascii_case("upgrade"));

        let (Some(method), Some(path)) = (req.method, req.path) else {
            return Some(Err(()));
        };

        sink.on_url(path.as_bytes());
        for header in headers {
            sink.on_header_field(header.name.as_bytes());
            sink.on_header_value(header.value);
        }
        sink.on_headers_complete(method, 1, minor);

        let body = self.buffer.split_off(body_offset);
        self.buffer.clear();

        let phase = match framer {
            Some(framer) => Phase::Body(framer),
            None => {
                sink.on_message_complete();
                Phase::Complete
            }
        };

        Some(Ok((phase, body)))
    }
}

impl Tokenizer for H1Tokenizer {
    fn execute(&mut self, bytes: &[u8], sink: &mut dyn TokenSink) -> (usize, bool) {
        let total = bytes.len();
        let mut work = BytesMut::from(bytes);

        loop {
            if matches!(self.phase, Phase::Headers) {
                if !self.started {
                    self.started = true;
                    sink.on_message_begin();
                }

                self.buffer.extend_from_slice(&work);
                work.clear();

                match self.tokenize_headers(sink) {
                    // header section still incomplete, everything buffered
                    None => break,
                    Some(Err(())) => return (0, self.upgrade),
                    Some(Ok((phase, body))) => {
                        // body bytes can only have arrived in the call that
                        // completed the header section
                        self.phase = phase;
                        work = body;
                        continue;
                    }
                }
            }

            let Phase::Body(framer) = &mut self.phase else {
                // complete, pipelined bytes stay unconsumed
                break;
            };

            let item = match framer {
                BodyFramer::Length(length) => Ok(length.advance(&mut work)),
                BodyFramer::Chunked(chunked) => chunked.advance(&mut work),
            };

            match item {
                Ok(Some(BodyItem::Chunk(chunk))) => sink.on_body(&chunk),
                Ok(Some(BodyItem::End)) => {
                    self.phase = Phase::Complete;
                    sink.on_message_complete();
                }
                Ok(None) => break,
                Err(e) => {
                    trace!(cause = %e, "body framing failed");
                    return (0, self.upgrade);
                }
            }
        }

        (total - work.len(), self.upgrade)
    }

    fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    fn reset(&mut self) {
        self.phase = Phase::Headers;
        self.buffer.clear();
        self.keep_alive = false;
        self.upgrade = false;
        self.started = false;
    }
}

/// Derives connection reuse from the HTTP version and `Connection` header.
///
/// HTTP/1.1 connections persist unless the peer sends `Connection: close`;
/// HTTP/1.0 connections persist only on an explicit `keep-alive` token.
fn connection_keep_alive(version_minor: u16, headers: &[httparse::Header<'_>]) -> bool {
    let connection = headers.iter().find(|h| h.name.eq_ignore_ascii_case("connection")).map(|h| h.value);

    match connection {
        Some(value) => {
            let mut close = false;
            let mut keep_alive = false;
            for token in value.split(|b| *b == b',') {
                let token = token.trim_ascii();
                close |= token.eq_ignore_ascii_case(b"close");
                keep_alive |= token.eq_ignore_ascii_case(b"keep-alive");
            }
            if close {
                false
            } else if keep_alive {
                true
            } else {
                version_minor >= 1
            }
        }
        None => version_minor >= 1,
    }
}

/// Selects the body framing from Content-Length and Transfer-Encoding.
///
/// Per RFC 9112 a message carrying both headers is rejected, and `chunked`
/// only applies when it is the final listed encoding.
fn body_framing(headers: &[httparse::Header<'_>]) -> Result<Option<BodyFramer>, ()> {
    let te = headers.iter().find(|h| h.name.eq_ignore_ascii_case("transfer-encoding")).map(|h| h.value);
    let cl = headers.iter().find(|h| h.name.eq_ignore_ascii_case("content-length")).map(|h| h.value);

    match (te, cl) {
        (None, None) => Ok(None),

        (Some(value), None) => {
            let chunked_last = value.rsplit(|b| *b == b',').next().map(<[u8]>::trim_ascii) == Some(&b"chunked"[..]);
            if chunked_last { Ok(Some(BodyFramer::Chunked(ChunkedFramer::new()))) } else { Ok(None) }
        }

        (None, Some(value)) => {
            let Ok(length) = std::str::from_utf8(value).map_err(|_| ()).and_then(|s| s.trim().parse::<u64>().map_err(|_| ()))
            else {
                trace!("invalid content-length value");
                return Err(());
            };
            if length == 0 { Ok(None) } else { Ok(Some(BodyFramer::Length(LengthFramer::new(length)))) }
        }

        (Some(_), Some(_)) => {
            trace!("transfer-encoding and content-length both present");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    /// Sink that records every event for assertions.
    #[derive(Debug, Default)]
    struct RecordingSink {
        url: Vec<u8>,
        fields: Vec<String>,
        values: Vec<String>,
        method: Option<String>,
        version: Option<(u16, u16)>,
        body: Vec<u8>,
        began: usize,
        headers_complete: usize,
        message_complete: usize,
    }

    impl TokenSink for RecordingSink {
        fn on_message_begin(&mut self) {
            self.began += 1;
        }

        fn on_url(&mut self, raw: &[u8]) {
            self.url.extend_from_slice(raw);
        }

        fn on_header_field(&mut self, chunk: &[u8]) {
            self.fields.push(String::from_utf8_lossy(chunk).into_owned());
        }

        fn on_header_value(&mut self, chunk: &[u8]) {
            self.values.push(String::from_utf8_lossy(chunk).into_owned());
        }

        fn on_headers_complete(&mut self, method: &str, _version_major: u16, version_minor: u16) {
            self.method = Some(method.to_owned());
            self.version = Some((1, version_minor));
            self.headers_complete += 1;
        }

        fn on_body(&mut self, chunk: &[u8]) {
            self.body.extend_from_slice(chunk);
        }

        fn on_message_complete(&mut self) {
            self.message_complete += 1;
        }
    }

    fn request_bytes() -> String {
        indoc! {r"
            POST /upload HTTP/1.1
            Host: 127.0.0.1:8080
            Content-Length: 5

            hello"}
        .replace('\n', "\r\n")
    }

    #[test]
    fn parses_whole_request_in_one_call() {
        let raw = request_bytes();
        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, upgrade) = tokenizer.execute(raw.as_bytes(), &mut sink);

        assert_eq!(consumed, raw.len());
        assert!(!upgrade);
        assert_eq!(sink.method.as_deref(), Some("POST"));
        assert_eq!(sink.url, b"/upload");
        assert_eq!(sink.version, Some((1, 1)));
        assert_eq!(sink.fields, vec!["Host", "Content-Length"]);
        assert_eq!(sink.body, b"hello");
        assert_eq!(sink.began, 1);
        assert_eq!(sink.headers_complete, 1);
        assert_eq!(sink.message_complete, 1);
        assert!(tokenizer.is_keep_alive());
    }

    #[test]
    fn parses_across_arbitrary_split_points() {
        let raw = request_bytes();
        for split in 1..raw.len() {
            let mut tokenizer = H1Tokenizer::request();
            let mut sink = RecordingSink::default();

            let (first, second) = raw.as_bytes().split_at(split);
            let (consumed, _) = tokenizer.execute(first, &mut sink);
            assert_eq!(consumed, first.len(), "split at {split}");
            let (consumed, _) = tokenizer.execute(second, &mut sink);
            assert_eq!(consumed, second.len(), "split at {split}");

            assert_eq!(sink.body, b"hello", "split at {split}");
            assert_eq!(sink.message_complete, 1, "split at {split}");
        }
    }

    #[test]
    fn leaves_pipelined_bytes_unconsumed() {
        let mut raw = request_bytes();
        raw.push_str("GET / HTTP/1.1\r\n\r\n");

        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert_eq!(consumed, request_bytes().len());
        assert_eq!(sink.message_complete, 1);

        // nothing further consumed once complete
        let (consumed, _) = tokenizer.execute(&raw.as_bytes()[consumed..], &mut sink);
        assert_eq!(consumed, 0);
    }

    #[test]
    fn chunked_body_is_decoded_into_events() {
        let raw = indoc! {r"
            POST /stream HTTP/1.1
            Host: localhost
            Transfer-Encoding: chunked

            5
            hello
            7
            , world
            0

        "}
        .replace('\n', "\r\n");

        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert_eq!(consumed, raw.len());
        assert_eq!(sink.body, b"hello, world");
        assert_eq!(sink.message_complete, 1);
    }

    #[test]
    fn keep_alive_follows_version_and_connection_header() {
        let cases = [
            ("GET / HTTP/1.1\r\nHost: a\r\n\r\n", true),
            ("GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n", false),
            ("GET / HTTP/1.0\r\nHost: a\r\n\r\n", false),
            ("GET / HTTP/1.0\r\nHost: a\r\nConnection: keep-alive\r\n\r\n", true),
        ];

        for (raw, expected) in cases {
            let mut tokenizer = H1Tokenizer::request();
            let mut sink = RecordingSink::default();
            let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
            assert_eq!(consumed, raw.len());
            assert_eq!(tokenizer.is_keep_alive(), expected, "request: {raw:?}");
        }
    }

    #[test]
    fn upgrade_header_raises_flag_without_consuming_less() {
        let raw = "GET /ws HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n";
        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, upgrade) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert_eq!(consumed, raw.len());
        assert!(upgrade);
        assert_eq!(sink.message_complete, 1);
    }

    #[test]
    fn malformed_request_consumes_short() {
        let raw = "GARBAGE\0\r\n\r\n";
        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert!(consumed < raw.len());
    }

    #[test]
    fn conflicting_framing_headers_are_rejected() {
        let raw = "POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\nhello";
        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert!(consumed < raw.len());
        assert_eq!(sink.headers_complete, 0);
    }

    #[test]
    fn reset_allows_a_second_message() {
        let raw = request_bytes();
        let mut tokenizer = H1Tokenizer::request();
        let mut sink = RecordingSink::default();

        let (consumed, _) = tokenizer.execute(raw.as_bytes(), &mut sink);
        assert_eq!(consumed, raw.len());

        tokenizer.reset();
        let second = "GET /next HTTP/1.1\r\nHost: b\r\n\r\n";
        let mut sink2 = RecordingSink::default();
        let (consumed, _) = tokenizer.execute(second.as_bytes(), &mut sink2);

        assert_eq!(consumed, second.len());
        assert_eq!(sink2.method.as_deref(), Some("GET"));
        assert_eq!(sink2.url, b"/next");
        assert_eq!(sink2.message_complete, 1);
    }
}

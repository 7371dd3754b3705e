//! Incoming message parsing state machine
//!
//! This module turns a byte stream into a sequence of headers-complete, body
//! and message-complete events for exactly one in-flight request at a time,
//! and supports connection reuse across successive requests.
//!
//! # Components
//!
//! - [`IncomingMessage`]: owns the per-connection parse state, the body
//!   accumulator and the tokenizer instance
//! - [`HeaderAccumulator`]: builds the header collection from chunked
//!   field/value events, applying the merge-vs-drop policy
//! - [`ParserState`] / [`ParseOutcome`]: observable state machine values
//!
//! # Parse entry points
//!
//! Two entry points exist. The pull-based [`IncomingMessage::parse`] reads
//! from a caller-supplied reader until the state leaves
//! [`ParserState::Initial`]. The push-based [`IncomingMessage::parse_bytes`]
//! consumes an already-read byte span synchronously, for callers that manage
//! their own buffering.
//!
//! # Ownership
//!
//! An `IncomingMessage` is strictly single-owner: exactly one task may call
//! parse/read/drain/reset on an instance. The parser never owns the
//! connection; readers are borrowed per call.

mod headers;

pub use headers::HeaderAccumulator;

use std::io;

use bytes::BytesMut;
use http::{HeaderMap, Method};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::tokenizer::{H1Tokenizer, TokenSink, Tokenizer};

/// Read buffer size for pull-based parsing
const IO_BUFFER_SIZE: usize = 2048;

/// State of incoming message handling.
///
/// `Reset` is entered via [`IncomingMessage::reset`] between keep-alive
/// requests, or by the tokenizer after an interim message; the next parse
/// call rebinds the state to `Initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Initial,
    HeadersComplete,
    HeadersCompleteKeepAlive,
    MessageComplete,
    MessageCompleteKeepAlive,
    Error,
    Reset,
}

impl ParserState {
    /// Whether the header section is complete but the body is still pending.
    pub fn is_headers_complete(&self) -> bool {
        matches!(self, Self::HeadersComplete | Self::HeadersCompleteKeepAlive)
    }

    /// Whether the message has fully completed.
    pub fn is_message_complete(&self) -> bool {
        matches!(self, Self::MessageComplete | Self::MessageCompleteKeepAlive)
    }

    /// Whether the completed section allows connection reuse.
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, Self::HeadersCompleteKeepAlive | Self::MessageCompleteKeepAlive)
    }
}

/// Classification of a finished parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Success,
    /// The tokenizer consumed fewer bytes than supplied outside a reset
    ParsedLessThanRead,
    /// The peer closed the connection while headers were still expected
    UnexpectedEof,
    InternalError,
}

/// Per-message state accumulated from tokenizer events.
#[derive(Debug)]
struct MessageCore {
    method: Option<Method>,
    version: Option<(u16, u16)>,
    url: BytesMut,
    url_string: String,
    accumulator: HeaderAccumulator,
    body: BytesMut,
    save_body: bool,
    headers_done: bool,
    message_done: bool,
    reset_requested: bool,
}

impl MessageCore {
    fn new() -> Self {
        Self {
            method: None,
            version: None,
            url: BytesMut::new(),
            url_string: String::new(),
            accumulator: HeaderAccumulator::default(),
            body: BytesMut::new(),
            save_body: true,
            headers_done: false,
            message_done: false,
            reset_requested: false,
        }
    }

    /// Clears the in-progress header flag and URL accumulator.
    fn reset_transients(&mut self) {
        self.accumulator.reset_pending();
        self.url.clear();
    }

    /// Clears all per-message state for the next request on this connection.
    fn clear_message(&mut self) {
        self.method = None;
        self.version = None;
        self.url.clear();
        self.url_string.clear();
        self.accumulator.clear();
        self.body.clear();
        self.save_body = true;
        self.headers_done = false;
        self.message_done = false;
        self.reset_requested = false;
    }
}

impl TokenSink for MessageCore {
    fn on_url(&mut self, raw: &[u8]) {
        self.url.extend_from_slice(raw);
    }

    fn on_header_field(&mut self, chunk: &[u8]) {
        self.accumulator.push_field(chunk);
    }

    fn on_header_value(&mut self, chunk: &[u8]) {
        self.accumulator.push_value(chunk);
    }

    fn on_headers_complete(&mut self, method: &str, version_major: u16, version_minor: u16) {
        self.version = Some((version_major, version_minor));
        self.method = Method::from_bytes(method.as_bytes()).ok();
        self.url_string = String::from_utf8_lossy(&self.url).into_owned();
        self.accumulator.finish();
        self.headers_done = true;
    }

    fn on_body(&mut self, chunk: &[u8]) {
        if self.save_body {
            self.body.extend_from_slice(chunk);
        }
    }

    fn on_message_complete(&mut self) {
        self.message_done = true;
    }

    fn on_reset(&mut self) {
        self.reset_requested = true;
    }
}

/// An incoming HTTP message parsed incrementally from a connection.
///
/// Wraps a [`Tokenizer`] instance and accumulates the message's method, URL,
/// headers and body. One instance serves a whole keep-alive connection:
/// after a `MessageCompleteKeepAlive` completion, call
/// [`reset`](Self::reset) and parse the next request on the same instance.
///
/// On a non-keep-alive completion or any fatal parse error the tokenizer
/// instance is released and no further bytes are processed.
pub struct IncomingMessage {
    tokenizer: Option<Box<dyn Tokenizer>>,
    state: ParserState,
    core: MessageCore,
    io_buffer: BytesMut,
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("state", &self.state)
            .field("method", &self.core.method)
            .field("url", &self.core.url_string)
            .finish_non_exhaustive()
    }
}

impl IncomingMessage {
    /// Creates a message parser driving the supplied tokenizer.
    pub fn new(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self {
            tokenizer: Some(tokenizer),
            state: ParserState::Initial,
            core: MessageCore::new(),
            io_buffer: BytesMut::with_capacity(IO_BUFFER_SIZE),
        }
    }

    /// Creates a message parser for HTTP/1.x requests using the bundled
    /// [`H1Tokenizer`].
    pub fn request() -> Self {
        Self::new(Box::new(H1Tokenizer::request()))
    }

    /// Current parser state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// The request method, available once headers are complete.
    pub fn method(&self) -> Option<&Method> {
        self.core.method.as_ref()
    }

    /// The decoded request target, available once headers are complete.
    pub fn url(&self) -> &str {
        &self.core.url_string
    }

    /// The raw request target bytes.
    pub fn raw_url(&self) -> &[u8] {
        &self.core.url
    }

    /// HTTP (major, minor) version, available once headers are complete.
    pub fn http_version(&self) -> Option<(u16, u16)> {
        self.core.version
    }

    /// Headers received so far.
    pub fn headers(&self) -> &HeaderMap {
        self.core.accumulator.headers()
    }

    /// Pull-parses one message from `reader` until the state leaves
    /// [`ParserState::Initial`].
    ///
    /// Returns exactly one outcome. `Success` means the header section (and
    /// possibly the whole message) completed; the resulting state is
    /// observable via [`state`](Self::state). A parse begun while the state
    /// is `Reset` first rebinds the parser for the next keep-alive request.
    pub async fn parse<R>(&mut self, reader: &mut R) -> ParseOutcome
    where
        R: AsyncRead + Unpin,
    {
        if self.state == ParserState::Reset {
            self.rebind();
        }

        if self.state != ParserState::Initial || self.tokenizer.is_none() {
            self.release_tokenizer();
            self.state = ParserState::Error;
            return ParseOutcome::InternalError;
        }

        let mut offset = 0;
        while self.state == ParserState::Initial {
            if offset == 0 {
                self.io_buffer.clear();
                match reader.read_buf(&mut self.io_buffer).await {
                    Ok(0) => {
                        self.release_tokenizer();
                        self.state = ParserState::Error;
                        return ParseOutcome::UnexpectedEof;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        trace!(cause = %e, "read failed while awaiting headers");
                        self.release_tokenizer();
                        self.state = ParserState::Error;
                        return ParseOutcome::UnexpectedEof;
                    }
                }
            }

            let Some(tokenizer) = self.tokenizer.as_mut() else {
                self.state = ParserState::Error;
                return ParseOutcome::InternalError;
            };

            let chunk = &self.io_buffer[offset..];
            let supplied = chunk.len();
            let (consumed, upgrade) = tokenizer.execute(chunk, &mut self.core);
            if upgrade {
                debug!("protocol upgrade requested, not supported");
            }
            self.apply_transitions();

            if consumed == supplied {
                offset = 0;
            } else if self.state == ParserState::Reset {
                // the short message was an interim one, keep on parsing from
                // the unconsumed offset
                self.state = ParserState::Initial;
                if let Some(tokenizer) = self.tokenizer.as_mut() {
                    tokenizer.reset();
                }
                offset += consumed;
                if offset >= self.io_buffer.len() {
                    offset = 0;
                }
            } else {
                self.release_tokenizer();
                self.state = ParserState::Error;
                return ParseOutcome::ParsedLessThanRead;
            }
        }

        ParseOutcome::Success
    }

    /// Push-parses an already-read byte span synchronously.
    ///
    /// Does not block on further I/O; returns the resulting state and
    /// outcome. An empty span is an unexpected EOF.
    pub fn parse_bytes(&mut self, buf: &[u8]) -> (ParserState, ParseOutcome) {
        if self.tokenizer.is_none() {
            return (ParserState::Error, ParseOutcome::InternalError);
        }

        if buf.is_empty() {
            self.release_tokenizer();
            self.state = ParserState::Error;
            return (self.state, ParseOutcome::UnexpectedEof);
        }

        if self.state == ParserState::Reset {
            self.rebind();
        }

        let mut offset = 0;
        while self.state == ParserState::Initial && offset < buf.len() {
            let Some(tokenizer) = self.tokenizer.as_mut() else {
                break;
            };

            let chunk = &buf[offset..];
            let (consumed, upgrade) = tokenizer.execute(chunk, &mut self.core);
            if upgrade {
                debug!("protocol upgrade requested, not supported");
            }
            self.apply_transitions();

            if consumed != chunk.len() {
                if self.state == ParserState::Reset {
                    self.state = ParserState::Initial;
                    if let Some(tokenizer) = self.tokenizer.as_mut() {
                        tokenizer.reset();
                    }
                } else {
                    self.release_tokenizer();
                    self.state = ParserState::Error;
                }
            }
            offset += consumed;
        }

        let outcome = if self.state == ParserState::Error { ParseOutcome::ParsedLessThanRead } else { ParseOutcome::Success };
        (self.state, outcome)
    }

    /// Reads body bytes into `dst`, returning the number of bytes moved.
    ///
    /// Drains the body accumulator first; when empty and the connection is
    /// mid-message, pulls one more chunk from `reader`, feeds the tokenizer
    /// and retries the drain once. A zero-byte read mid-body is an
    /// EOF-terminated body and completes the message.
    pub async fn read<R>(&mut self, reader: &mut R, dst: &mut BytesMut) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut count = self.drain_body_into(dst);

        if count == 0 && self.state.is_headers_complete() && self.tokenizer.is_some() {
            self.io_buffer.clear();
            let n = match reader.read_buf(&mut self.io_buffer).await {
                Ok(n) => n,
                Err(e) => {
                    self.release_tokenizer();
                    self.state = ParserState::Error;
                    return Err(e);
                }
            };

            if n > 0 {
                self.feed_body_chunk()?;
                count = self.drain_body_into(dst);
            } else {
                self.complete_at_eof();
            }
        }

        Ok(count)
    }

    /// Reads the whole remaining body into `dst`, returning the total size.
    pub async fn read_all<R>(&mut self, reader: &mut R, dst: &mut BytesMut) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut total = 0;
        loop {
            let n = self.read(reader, dst).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    /// Reads the next available body bytes as a string.
    pub async fn read_string<R>(&mut self, reader: &mut R) -> io::Result<Option<String>>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::new();
        let n = self.read(reader, &mut buffer).await?;
        if n > 0 { Ok(Some(String::from_utf8_lossy(&buffer).into_owned())) } else { Ok(None) }
    }

    /// Reads and discards the rest of the message body.
    ///
    /// Used to dispose of an unread body so a keep-alive connection's parser
    /// can be reset for the next request. Errors collapse the state to
    /// [`ParserState::Error`] instead of propagating.
    pub async fn drain<R>(&mut self, reader: &mut R)
    where
        R: AsyncRead + Unpin,
    {
        self.core.save_body = false;
        self.core.body.clear();

        while self.state.is_headers_complete() && self.tokenizer.is_some() {
            self.io_buffer.clear();
            match reader.read_buf(&mut self.io_buffer).await {
                Ok(0) => self.complete_at_eof(),
                Ok(_) => {
                    if self.feed_body_chunk().is_err() {
                        break;
                    }
                }
                Err(e) => {
                    trace!(cause = %e, "read failed while draining body");
                    self.release_tokenizer();
                    self.state = ParserState::Error;
                }
            }
        }

        self.core.save_body = true;
    }

    /// Rebinds the parser for the next request on a reused connection.
    ///
    /// Clears per-message transient fields and records state `Reset`; the
    /// next parse call returns the state machine to `Initial`.
    pub fn reset(&mut self) {
        self.core.reset_transients();
        self.state = ParserState::Reset;
    }

    fn rebind(&mut self) {
        if let Some(tokenizer) = self.tokenizer.as_mut() {
            tokenizer.reset();
        }
        self.core.clear_message();
        self.state = ParserState::Initial;
    }

    /// Feeds the freshly read io_buffer to the tokenizer while mid-message.
    fn feed_body_chunk(&mut self) -> io::Result<()> {
        let Some(tokenizer) = self.tokenizer.as_mut() else {
            return Ok(());
        };

        let supplied = self.io_buffer.len();
        let (consumed, _upgrade) = tokenizer.execute(&self.io_buffer[..], &mut self.core);
        self.apply_transitions();

        if consumed != supplied {
            self.release_tokenizer();
            self.state = ParserState::Error;
            return Err(io::Error::new(io::ErrorKind::InvalidData, "tokenizer consumed fewer bytes than supplied"));
        }

        Ok(())
    }

    fn drain_body_into(&mut self, dst: &mut BytesMut) -> usize {
        let n = self.core.body.len();
        if n > 0 {
            dst.extend_from_slice(&self.core.body);
            self.core.body.clear();
        }
        n
    }

    /// Applies state transitions recorded by the sink during execute.
    ///
    /// Keep-alive is sampled from the tokenizer at each completion; on a
    /// non-keep-alive message completion the tokenizer is released.
    fn apply_transitions(&mut self) {
        if std::mem::take(&mut self.core.headers_done) {
            let keep_alive = self.tokenizer.as_ref().is_some_and(|t| t.is_keep_alive());
            self.state = if keep_alive { ParserState::HeadersCompleteKeepAlive } else { ParserState::HeadersComplete };
        }

        if std::mem::take(&mut self.core.message_done) {
            let keep_alive = self.tokenizer.as_ref().is_some_and(|t| t.is_keep_alive());
            self.state = if keep_alive { ParserState::MessageCompleteKeepAlive } else { ParserState::MessageComplete };
            if !keep_alive {
                self.release_tokenizer();
            }
        }

        if std::mem::take(&mut self.core.reset_requested) {
            self.core.reset_transients();
            self.state = ParserState::Reset;
        }
    }

    /// Treats transport EOF mid-body as the end of the message.
    fn complete_at_eof(&mut self) {
        self.core.message_done = true;
        self.apply_transitions();
    }

    fn release_tokenizer(&mut self) {
        self.tokenizer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out scripted chunks, then EOF.
    struct ChunkReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkReader {
        fn new<I: IntoIterator<Item = Vec<u8>>>(chunks: I) -> Self {
            Self { chunks: chunks.into_iter().collect() }
        }

        fn whole(bytes: &[u8]) -> Self {
            Self::new([bytes.to_vec()])
        }
    }

    impl AsyncRead for ChunkReader {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            if let Some(chunk) = self.chunks.pop_front() {
                buf.put_slice(&chunk);
            }
            Poll::Ready(Ok(()))
        }
    }

    fn get_request() -> String {
        "GET /hello?a=1 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n".to_owned()
    }

    fn post_request(body: &str) -> String {
        format!("POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[tokio::test]
    async fn pull_parse_simple_request() {
        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::whole(get_request().as_bytes());

        let outcome = message.parse(&mut reader).await;

        assert_eq!(outcome, ParseOutcome::Success);
        assert_eq!(message.state(), ParserState::MessageCompleteKeepAlive);
        assert_eq!(message.method(), Some(&Method::GET));
        assert_eq!(message.url(), "/hello?a=1");
        assert_eq!(message.http_version(), Some((1, 1)));
        assert_eq!(message.headers().get("host").unwrap(), "localhost");
    }

    #[tokio::test]
    async fn pull_parse_across_chunked_reads() {
        let raw = post_request("hello world!");
        let chunks: Vec<Vec<u8>> = raw.as_bytes().chunks(7).map(<[u8]>::to_vec).collect();

        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::new(chunks);

        let outcome = message.parse(&mut reader).await;
        assert_eq!(outcome, ParseOutcome::Success);
        assert!(message.state().is_headers_complete() || message.state().is_message_complete());

        let mut body = BytesMut::new();
        message.read_all(&mut reader, &mut body).await.unwrap();
        assert_eq!(&body[..], b"hello world!");
        assert_eq!(message.state(), ParserState::MessageCompleteKeepAlive);
    }

    #[tokio::test]
    async fn repeated_reads_match_read_all() {
        let raw = post_request("the quick brown fox jumps over the lazy dog");

        let collect_repeated = async {
            let mut message = IncomingMessage::request();
            let mut reader = ChunkReader::new(raw.as_bytes().chunks(5).map(<[u8]>::to_vec));
            message.parse(&mut reader).await;

            let mut body = BytesMut::new();
            loop {
                let mut piece = BytesMut::new();
                if message.read(&mut reader, &mut piece).await.unwrap() == 0 {
                    break;
                }
                body.extend_from_slice(&piece);
            }
            body
        };

        let collect_all = async {
            let mut message = IncomingMessage::request();
            let mut reader = ChunkReader::new(raw.as_bytes().chunks(11).map(<[u8]>::to_vec));
            message.parse(&mut reader).await;

            let mut body = BytesMut::new();
            message.read_all(&mut reader, &mut body).await.unwrap();
            body
        };

        assert_eq!(collect_repeated.await, collect_all.await);
    }

    #[tokio::test]
    async fn keep_alive_reset_parses_second_request() {
        let first = post_request("first");
        let second = get_request();

        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::new([first.into_bytes(), second.into_bytes()]);

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        let mut body = BytesMut::new();
        message.read_all(&mut reader, &mut body).await.unwrap();
        assert_eq!(&body[..], b"first");
        assert_eq!(message.state(), ParserState::MessageCompleteKeepAlive);

        message.reset();
        assert_eq!(message.state(), ParserState::Reset);

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        assert_eq!(message.method(), Some(&Method::GET));
        assert_eq!(message.url(), "/hello?a=1");
        // no leakage from the first request
        assert!(message.headers().get("content-length").is_none());
        assert_eq!(message.state(), ParserState::MessageCompleteKeepAlive);
    }

    #[tokio::test]
    async fn eof_before_headers_is_unexpected() {
        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::new([]);

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::UnexpectedEof);
        assert_eq!(message.state(), ParserState::Error);
    }

    #[tokio::test]
    async fn eof_mid_body_completes_message() {
        let raw = "POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\n\r\npartial";
        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::whole(raw.as_bytes());

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        assert!(message.state().is_headers_complete());

        let mut body = BytesMut::new();
        message.read_all(&mut reader, &mut body).await.unwrap();

        assert_eq!(&body[..], b"partial");
        assert!(message.state().is_message_complete());
    }

    #[tokio::test]
    async fn drain_disposes_unread_body() {
        let raw = post_request("unread body bytes");
        let mut message = IncomingMessage::request();
        let mut reader = ChunkReader::whole(raw.as_bytes());

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        message.drain(&mut reader).await;

        assert!(message.state().is_message_complete());
        let mut body = BytesMut::new();
        assert_eq!(message.read(&mut reader, &mut body).await.unwrap(), 0);
    }

    #[test]
    fn push_parse_full_request() {
        let raw = get_request();
        let mut message = IncomingMessage::request();

        let (state, outcome) = message.parse_bytes(raw.as_bytes());

        assert_eq!(outcome, ParseOutcome::Success);
        assert_eq!(state, ParserState::MessageCompleteKeepAlive);
        assert_eq!(message.method(), Some(&Method::GET));
    }

    #[test]
    fn push_parse_empty_span_is_eof() {
        let mut message = IncomingMessage::request();
        let (state, outcome) = message.parse_bytes(b"");

        assert_eq!(state, ParserState::Error);
        assert_eq!(outcome, ParseOutcome::UnexpectedEof);
    }

    #[test]
    fn push_parse_after_reset() {
        let mut message = IncomingMessage::request();
        let (_, outcome) = message.parse_bytes(get_request().as_bytes());
        assert_eq!(outcome, ParseOutcome::Success);

        message.reset();
        let raw = indoc! {r"
            DELETE /items/3 HTTP/1.1
            Host: localhost

        "}
        .replace('\n', "\r\n");
        let (state, outcome) = message.parse_bytes(raw.as_bytes());

        assert_eq!(outcome, ParseOutcome::Success);
        assert_eq!(state, ParserState::MessageCompleteKeepAlive);
        assert_eq!(message.method(), Some(&Method::DELETE));
        assert_eq!(message.url(), "/items/3");
    }

    /// Tokenizer that always consumes one byte less than supplied.
    struct ShortTokenizer;

    impl Tokenizer for ShortTokenizer {
        fn execute(&mut self, bytes: &[u8], _sink: &mut dyn TokenSink) -> (usize, bool) {
            (bytes.len().saturating_sub(1), false)
        }

        fn is_keep_alive(&self) -> bool {
            false
        }

        fn reset(&mut self) {}
    }

    #[tokio::test]
    async fn short_parse_outside_reset_is_fatal() {
        let mut message = IncomingMessage::new(Box::new(ShortTokenizer));
        let mut reader = ChunkReader::whole(b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::ParsedLessThanRead);
        assert_eq!(message.state(), ParserState::Error);

        // the tokenizer was released, no further bytes are processed
        let mut body = BytesMut::new();
        assert_eq!(message.read(&mut reader, &mut body).await.unwrap(), 0);
        assert!(body.is_empty());
    }

    /// Tokenizer that reports an interim message before the real one.
    struct InterimTokenizer {
        resumed: bool,
    }

    impl Tokenizer for InterimTokenizer {
        fn execute(&mut self, bytes: &[u8], sink: &mut dyn TokenSink) -> (usize, bool) {
            if self.resumed {
                sink.on_headers_complete("GET", 1, 1);
                sink.on_message_complete();
                (bytes.len(), false)
            } else {
                sink.on_reset();
                (bytes.len() / 2, false)
            }
        }

        fn is_keep_alive(&self) -> bool {
            false
        }

        fn reset(&mut self) {
            self.resumed = true;
        }
    }

    #[tokio::test]
    async fn short_parse_from_reset_resumes() {
        let mut message = IncomingMessage::new(Box::new(InterimTokenizer { resumed: false }));
        let mut reader = ChunkReader::whole(b"0123456789");

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        assert_eq!(message.state(), ParserState::MessageComplete);
    }

    #[tokio::test]
    async fn parse_while_mid_message_is_internal_error() {
        let raw = post_request("pending body");
        let mut message = IncomingMessage::request();
        // deliver only the header section so the body stays pending
        let header_end = raw.find("\r\n\r\n").unwrap() + 4;
        let mut reader = ChunkReader::whole(&raw.as_bytes()[..header_end]);

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::Success);
        assert!(message.state().is_headers_complete());

        assert_eq!(message.parse(&mut reader).await, ParseOutcome::InternalError);
        assert_eq!(message.state(), ParserState::Error);
    }
}

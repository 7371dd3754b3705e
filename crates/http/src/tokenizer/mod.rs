//! HTTP/1.x tokenizer abstraction and bundled implementation
//!
//! The engine never parses raw HTTP bytes itself. It drives a [`Tokenizer`],
//! which consumes byte spans and reports protocol structure as a stream of
//! events into a [`TokenSink`] visitor. This keeps the wire-level state
//! machine replaceable while the [`message`](crate::message) layer owns all
//! per-connection state.
//!
//! # Components
//!
//! - [`Tokenizer`]: the collaborator boundary — execute bytes, query
//!   keep-alive, reset between messages
//! - [`TokenSink`]: synchronous visitor invoked by the tokenizer while it
//!   walks the supplied bytes
//! - [`H1Tokenizer`]: the bundled HTTP/1.x request tokenizer, built on
//!   `httparse` plus incremental body framers
//!
//! # Error reporting
//!
//! The boundary has no error channel. A tokenizer signals a fatal condition
//! by consuming fewer bytes than it was given; the caller decides whether
//! that was a benign interim-message resume (see [`TokenSink::on_reset`]) or
//! a dead connection.

mod framing;
mod h1;

pub use h1::H1Tokenizer;

/// Synchronous visitor for tokenizer events.
///
/// Events fire in message order: `on_message_begin`, zero or more `on_url` /
/// `on_header_field` / `on_header_value` chunks, `on_headers_complete`, zero
/// or more `on_body` chunks, `on_message_complete`. Field and value chunks
/// may arrive in arbitrary sizes; a field chunk following at least one value
/// chunk means the previous header is complete.
pub trait TokenSink {
    /// A new message has started.
    fn on_message_begin(&mut self) {}

    /// A chunk of the request target (URL) bytes.
    fn on_url(&mut self, raw: &[u8]);

    /// A chunk of a header field name.
    fn on_header_field(&mut self, chunk: &[u8]);

    /// A chunk of a header value.
    fn on_header_value(&mut self, chunk: &[u8]);

    /// The header section is complete.
    fn on_headers_complete(&mut self, method: &str, version_major: u16, version_minor: u16);

    /// A chunk of decoded body bytes.
    fn on_body(&mut self, chunk: &[u8]);

    /// The message is complete.
    fn on_message_complete(&mut self);

    /// The tokenizer finished an interim message (e.g. a 100 Continue) and
    /// expects the caller to resume parsing from the unconsumed offset.
    fn on_reset(&mut self) {}
}

/// The wire-level HTTP tokenizer collaborator.
pub trait Tokenizer: Send {
    /// Consumes bytes from `bytes`, emitting events into `sink`.
    ///
    /// Returns the number of bytes consumed and whether the message
    /// requested a protocol upgrade. Consuming fewer bytes than supplied is
    /// a fatal condition unless the sink just observed
    /// [`TokenSink::on_reset`].
    fn execute(&mut self, bytes: &[u8], sink: &mut dyn TokenSink) -> (usize, bool);

    /// Whether the current message allows the connection to be reused.
    ///
    /// Only meaningful once the header section has been tokenized.
    fn is_keep_alive(&self) -> bool;

    /// Rewinds the tokenizer to its initial state for the next message.
    fn reset(&mut self);
}

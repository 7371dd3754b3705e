//! An embeddable asynchronous HTTP/1.x server engine
//!
//! This crate provides the hard core of an HTTP/1.x server: a connection
//! accept loop with lifecycle management, TLS/ALPN protocol negotiation, and
//! an incremental request-parsing state machine with keep-alive reuse. It is
//! built on tokio and deliberately stops short of routing and response
//! serialization — those belong to the embedding application.
//!
//! # Features
//!
//! - Accept loop on a dedicated task, with chainable lifecycle callbacks
//!   (started / stopped / failed / client connection failed)
//! - Optional TLS via rustls, advertising every registered protocol name
//!   through ALPN and dispatching handshakes off the accept loop
//! - Process-wide processor registry keyed by negotiated protocol name
//! - Byte-at-a-time message parsing behind a pluggable tokenizer boundary,
//!   with strict header-merge and keep-alive semantics
//! - Streaming body reads with an explicit drain for unread bodies
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bytes::BytesMut;
//! use harbor_http::server::{IncomingRequest, Server, ServerDelegate};
//! use tokio::io::AsyncWriteExt;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ServerDelegate for Echo {
//!     async fn handle(&self, request: &mut IncomingRequest<'_>) {
//!         let mut body = BytesMut::new();
//!         if request.read_all_body(&mut body).await.is_err() {
//!             return;
//!         }
//!
//!         let head = format!(
//!             "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
//!             body.len()
//!         );
//!         let writer = request.writer();
//!         let _ = writer.write_all(head.as_bytes()).await;
//!         let _ = writer.write_all(&body).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new();
//!     server.set_delegate(Arc::new(Echo));
//!     server
//!         .started(|| println!("serving"))
//!         .failed(|e| eprintln!("failed to start: {e}"));
//!
//!     if server.listen(8080).is_ok() {
//!         tokio::signal::ctrl_c().await.ok();
//!         server.stop();
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`server`]: accept loop, lifecycle state machine, processor registry,
//!   TLS delegate and the per-connection processors
//! - [`message`]: the incremental parsing state machine and header
//!   accumulation
//! - [`tokenizer`]: the wire-level tokenizer boundary and the bundled
//!   `httparse`-based implementation
//! - [`error`]: the crate's error type
//!
//! # Concurrency model
//!
//! One task per server instance runs the accept loop. TLS handshakes run on
//! their own tasks so slow clients cannot stall accepts; plaintext
//! connections dispatch inline. Each connection is served by exactly one
//! task, and the message parser is strictly single-owner — no internal
//! synchronization, by contract with the caller.
//!
//! # Limitations
//!
//! - HTTP/1.x only; the tokenizer's upgrade signal (HTTP/2, WebSocket) is
//!   observed but intentionally not acted upon
//! - No request routing and no response serialization
//! - Maximum header section: 8KB, maximum number of headers: 64

pub mod error;
pub mod message;
pub mod server;
pub mod tokenizer;

pub use error::ServerError;
pub use message::{HeaderAccumulator, IncomingMessage, ParseOutcome, ParserState};
pub use server::{
    Connection, ConnectionProcessor, ConnectionProcessorFactory, IncomingRequest, KeepAliveState, Server, ServerDelegate,
    ServerState, TlsDelegate, register,
};
pub use tokenizer::{H1Tokenizer, TokenSink, Tokenizer};

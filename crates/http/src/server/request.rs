//! The application-facing request surface.
//!
//! A processor hands each parsed request to the embedding application's
//! [`ServerDelegate`] as an [`IncomingRequest`]: the parsed method, URL,
//! version and headers, plus streaming body reads and raw write access to
//! the connection. Response serialization is deliberately left to the
//! embedder.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use http::{HeaderMap, Method};
use tracing::debug;

use crate::message::IncomingMessage;
use crate::server::Connection;

/// Handler for parsed requests, supplied by the embedding application.
#[async_trait]
pub trait ServerDelegate: Send + Sync {
    /// Handles one parsed request.
    ///
    /// Any body bytes left unread when this returns are drained by the
    /// processor before the connection is reused.
    async fn handle(&self, request: &mut IncomingRequest<'_>);
}

/// One parsed request bound to its connection.
///
/// Borrows the connection's message parser and transport for the duration
/// of the delegate call; body reads and raw writes go through this value.
#[derive(Debug)]
pub struct IncomingRequest<'a> {
    message: &'a mut IncomingMessage,
    connection: &'a mut Connection,
}

impl<'a> IncomingRequest<'a> {
    pub(crate) fn new(message: &'a mut IncomingMessage, connection: &'a mut Connection) -> Self {
        Self { message, connection }
    }

    /// The request method.
    pub fn method(&self) -> Option<&Method> {
        self.message.method()
    }

    /// The decoded request target.
    pub fn url(&self) -> &str {
        self.message.url()
    }

    /// The raw request target bytes.
    pub fn raw_url(&self) -> &[u8] {
        self.message.raw_url()
    }

    /// HTTP (major, minor) version.
    pub fn http_version(&self) -> Option<(u16, u16)> {
        self.message.http_version()
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        self.message.headers()
    }

    /// The peer's remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    /// Reads the next available body bytes into `dst`.
    pub async fn read_body(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        self.message.read(&mut *self.connection, dst).await
    }

    /// Reads the whole remaining body into `dst`.
    pub async fn read_all_body(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        self.message.read_all(&mut *self.connection, dst).await
    }

    /// Reads the next available body bytes as a string.
    pub async fn read_string(&mut self) -> io::Result<Option<String>> {
        self.message.read_string(&mut *self.connection).await
    }

    /// Raw write access to the connection, for the embedder's response.
    pub fn writer(&mut self) -> &mut Connection {
        self.connection
    }
}

/// Delegate used when the embedding application supplied none.
///
/// Logs and discards every request, leaving the connection open for the
/// processor's keep-alive handling.
#[derive(Debug, Default)]
pub(crate) struct DiscardDelegate;

#[async_trait]
impl ServerDelegate for DiscardDelegate {
    async fn handle(&self, request: &mut IncomingRequest<'_>) {
        debug!(url = request.url(), peer = %request.peer_addr(), "no delegate configured, discarding request");
    }
}

//! Accepted client connections.
//!
//! [`Connection`] unifies plain TCP and TLS streams behind `AsyncRead` +
//! `AsyncWrite`, so processors and the message parser stay transport
//! agnostic. A connection is created by the accept loop, handed to exactly
//! one processor, and destroyed on close or unrecoverable parse error.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

#[derive(Debug)]
enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// One accepted client connection, plain or TLS.
#[derive(Debug)]
pub struct Connection {
    transport: Transport,
    peer_addr: SocketAddr,
}

impl Connection {
    pub(crate) fn plain(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { transport: Transport::Plain(stream), peer_addr }
    }

    pub(crate) fn tls(stream: TlsStream<TcpStream>, peer_addr: SocketAddr) -> Self {
        Self { transport: Transport::Tls(Box::new(stream)), peer_addr }
    }

    /// The peer's remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The protocol name negotiated during the TLS handshake, if any.
    pub fn negotiated_protocol(&self) -> Option<String> {
        match &self.transport {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => {
                stream.get_ref().1.alpn_protocol().map(|proto| String::from_utf8_lossy(proto).into_owned())
            }
        }
    }

    /// Shuts the write side down, flushing any TLS close notify.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.shutdown().await,
            Transport::Tls(stream) => stream.shutdown().await,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.transport {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match &mut self.transport {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.transport {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.transport {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

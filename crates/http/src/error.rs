//! Error types for the server engine.
//!
//! Fatal setup failures (bind, TLS configuration) surface through
//! [`ServerError`] and the lifecycle fail callbacks; per-connection failures
//! are reported through the client-connection-fail callbacks and logs. No
//! condition in this crate terminates the owning process.

use std::io;

use thiserror::Error;

use crate::message::ParseOutcome;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("tls configuration error: {source}")]
    TlsConfig {
        #[source]
        source: rustls::Error,
    },

    #[error("tls handshake failed: {source}")]
    Handshake {
        #[source]
        source: io::Error,
    },

    #[error("request parse failed: {outcome:?}")]
    Parse { outcome: ParseOutcome },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ServerError {
    pub fn bind<E: Into<io::Error>>(port: u16, e: E) -> Self {
        Self::Bind { port, source: e.into() }
    }

    pub fn tls_config(e: rustls::Error) -> Self {
        Self::TlsConfig { source: e }
    }

    pub fn handshake<E: Into<io::Error>>(e: E) -> Self {
        Self::Handshake { source: e.into() }
    }

    pub fn parse(outcome: ParseOutcome) -> Self {
        Self::Parse { outcome }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

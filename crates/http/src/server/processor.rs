//! Per-connection processors and their factories.
//!
//! The accept loop selects a [`ConnectionProcessorFactory`] by negotiated
//! protocol name and hands the accepted [`Connection`] to the processor it
//! builds. The bundled [`Http1Processor`] drives the HTTP/1.x request cycle:
//! parse, delegate, drain, and keep-alive reuse.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::ServerError;
use crate::message::{IncomingMessage, ParseOutcome, ParserState};
use crate::server::request::{IncomingRequest, ServerDelegate};
use crate::server::Connection;

/// Bound on requests served per keep-alive connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveState {
    /// No limit on connection reuse
    Unlimited,
    /// At most this many requests per connection
    Limited(u64),
    /// Every request gets a fresh connection
    Disabled,
}

impl KeepAliveState {
    /// Whether another request may be served after `served` completed ones.
    fn allows_another(&self, served: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => served < *max,
            Self::Disabled => false,
        }
    }
}

/// Builds a processor per accepted connection.
///
/// Factories are registered process-wide under their protocol name; see
/// [`register`](crate::server::register).
pub trait ConnectionProcessorFactory: Send + Sync {
    /// The ALPN protocol name this factory serves, e.g. `"http/1.1"`.
    fn protocol(&self) -> &str;

    /// Creates a processor for one connection.
    fn create(&self, delegate: Arc<dyn ServerDelegate>, keep_alive: KeepAliveState) -> Box<dyn ConnectionProcessor>;
}

/// Serves one connection to completion.
#[async_trait]
pub trait ConnectionProcessor: Send {
    async fn serve(self: Box<Self>, connection: Connection) -> Result<(), ServerError>;
}

/// Factory for the default HTTP/1.x processor.
#[derive(Debug, Default)]
pub struct Http1ProcessorFactory;

impl ConnectionProcessorFactory for Http1ProcessorFactory {
    fn protocol(&self) -> &str {
        "http/1.1"
    }

    fn create(&self, delegate: Arc<dyn ServerDelegate>, keep_alive: KeepAliveState) -> Box<dyn ConnectionProcessor> {
        Box::new(Http1Processor { delegate, keep_alive })
    }
}

/// HTTP/1.x request cycle on one connection.
pub struct Http1Processor {
    delegate: Arc<dyn ServerDelegate>,
    keep_alive: KeepAliveState,
}

impl std::fmt::Debug for Http1Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Processor").field("keep_alive", &self.keep_alive).finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionProcessor for Http1Processor {
    async fn serve(self: Box<Self>, mut connection: Connection) -> Result<(), ServerError> {
        let peer = connection.peer_addr();
        let mut message = IncomingMessage::request();
        let mut served: u64 = 0;

        loop {
            match message.parse(&mut connection).await {
                ParseOutcome::Success => {}
                ParseOutcome::UnexpectedEof => {
                    debug!(peer = %peer, "connection closed by peer");
                    break;
                }
                outcome => {
                    warn!(peer = %peer, ?outcome, "closing connection after parse failure");
                    return Err(ServerError::parse(outcome));
                }
            }

            trace!(peer = %peer, method = ?message.method(), url = message.url(), "request parsed");

            {
                let mut request = IncomingRequest::new(&mut message, &mut connection);
                self.delegate.handle(&mut request).await;
            }

            // dispose of anything the delegate left unread
            message.drain(&mut connection).await;
            served += 1;

            if message.state() == ParserState::Error {
                return Err(ServerError::parse(ParseOutcome::ParsedLessThanRead));
            }

            if message.state() != ParserState::MessageCompleteKeepAlive || !self.keep_alive.allows_another(served) {
                break;
            }

            message.reset();
        }

        if let Err(e) = connection.shutdown().await {
            trace!(peer = %peer, cause = %e, "connection shutdown failed");
        }
        Ok(())
    }
}

//! Connection accept loop and server lifecycle
//!
//! This module owns the listening socket, the server state machine and the
//! dispatch of accepted connections to per-protocol processors.
//!
//! # Components
//!
//! - [`Server`]: the embeddable server engine — listen, stop, lifecycle
//!   callbacks
//! - [`register`]: process-wide processor factory registration by ALPN
//!   protocol name
//! - [`TlsDelegate`]: optional TLS handshake configuration with ALPN
//!   advertisement
//! - [`Connection`] / [`ConnectionProcessor`]: accepted transports and the
//!   per-connection handlers that serve them
//!
//! # Lifecycle
//!
//! `listen` binds the socket, fires start callbacks synchronously and runs
//! the accept loop on a dedicated task. With TLS configured, per-connection
//! initialization (handshake plus ALPN resolution) moves to its own task so
//! a slow handshake cannot stall further accepts; plaintext connections are
//! dispatched inline. `stop` flips the state and cancels the loop, which
//! observes the cancellation at its next wakeup; stop callbacks fire when
//! the loop task exits.

mod connection;
mod lifecycle;
mod processor;
mod registry;
mod request;
mod tls;

pub use connection::Connection;
pub use processor::{ConnectionProcessor, ConnectionProcessorFactory, Http1Processor, Http1ProcessorFactory, KeepAliveState};
pub use registry::register;
pub use request::{IncomingRequest, ServerDelegate};
pub use tls::TlsDelegate;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::server::lifecycle::LifecycleListener;
use crate::server::request::DiscardDelegate;

/// Maximum number of pending connections queued by the OS
const MAX_PENDING_CONNECTIONS: u32 = 100;

/// Protocol assumed when TLS is absent or nothing was negotiated
const DEFAULT_PROTOCOL: &str = "http/1.1";

/// Observable server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unknown,
    Started,
    Stopped,
    Failed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An HTTP server that listens for connections on a socket.
///
/// ```no_run
/// use std::sync::Arc;
/// use harbor_http::server::Server;
///
/// # async fn run(delegate: Arc<dyn harbor_http::server::ServerDelegate>) {
/// let server = Server::new();
/// server.set_delegate(delegate);
/// server.started(|| println!("up")).failed(|e| eprintln!("refused to start: {e}"));
/// server.listen(8080).unwrap();
/// // ...
/// server.stop();
/// # }
/// ```
///
/// Cloning the handle is cheap; all clones observe the same instance.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state()).field("port", &self.port()).finish_non_exhaustive()
    }
}

struct ServerInner {
    state: Mutex<ServerState>,
    /// Actually-bound listening port, recorded by listen
    port: Mutex<Option<u16>>,
    allow_port_reuse: AtomicBool,
    keep_alive: Mutex<KeepAliveState>,
    delegate: RwLock<Option<Arc<dyn ServerDelegate>>>,
    tls: Mutex<Option<TlsDelegate>>,
    lifecycle: LifecycleListener,
    shutdown: Mutex<CancellationToken>,
    connections: Mutex<TaskTracker>,
}

impl ServerInner {
    fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    fn stop(&self) {
        *lock(&self.state) = ServerState::Stopped;
        lock(&self.shutdown).cancel();
        lock(&self.connections).close();
    }
}

impl Server {
    /// Creates a server.
    ///
    /// Constructing any server installs the default `"http/1.1"` processor
    /// factory, exactly once per process.
    pub fn new() -> Self {
        registry::ensure_default_registration();
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState::Unknown),
                port: Mutex::new(None),
                allow_port_reuse: AtomicBool::new(false),
                keep_alive: Mutex::new(KeepAliveState::Unlimited),
                delegate: RwLock::new(None),
                tls: Mutex::new(None),
                lifecycle: LifecycleListener::default(),
                shutdown: Mutex::new(CancellationToken::new()),
                connections: Mutex::new(TaskTracker::new()),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.state()
    }

    /// The actually-bound listening port, once `listen` succeeded.
    pub fn port(&self) -> Option<u16> {
        *lock(&self.inner.port)
    }

    /// Whether the listening socket allows port reuse (default: disallowed).
    pub fn set_allow_port_reuse(&self, allow: bool) -> &Self {
        self.inner.allow_port_reuse.store(allow, Ordering::Relaxed);
        self
    }

    /// Bounds the number of requests served per keep-alive connection.
    pub fn set_keep_alive(&self, keep_alive: KeepAliveState) -> &Self {
        *lock(&self.inner.keep_alive) = keep_alive;
        self
    }

    /// Sets the delegate that receives parsed requests.
    pub fn set_delegate(&self, delegate: Arc<dyn ServerDelegate>) -> &Self {
        *self.inner.delegate.write().unwrap_or_else(PoisonError::into_inner) = Some(delegate);
        self
    }

    /// Attaches a TLS handshake delegate to the listening socket.
    pub fn set_tls(&self, tls: TlsDelegate) -> &Self {
        *lock(&self.inner.tls) = Some(tls);
        self
    }

    /// Listens for connections on `port`.
    ///
    /// Must be called within a tokio runtime: the accept loop is spawned on
    /// a dedicated task. Requesting port 0 binds an ephemeral port,
    /// observable via [`port`](Self::port) afterwards. On success the state
    /// becomes [`ServerState::Started`] and start callbacks fire before this
    /// returns; on failure the state becomes [`ServerState::Failed`], fail
    /// callbacks fire and the error is returned.
    pub fn listen(&self, port: u16) -> Result<(), ServerError> {
        match self.bind_and_spawn(port) {
            Ok(()) => Ok(()),
            Err(e) => {
                *lock(&self.inner.state) = ServerState::Failed;
                self.inner.lifecycle.perform_fail_callbacks(&e);
                Err(e)
            }
        }
    }

    fn bind_and_spawn(&self, port: u16) -> Result<(), ServerError> {
        let socket = TcpSocket::new_v4().map_err(|e| ServerError::bind(port, e))?;
        if self.inner.allow_port_reuse.load(Ordering::Relaxed) {
            socket.set_reuseaddr(true).map_err(|e| ServerError::bind(port, e))?;
        }
        socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).map_err(|e| ServerError::bind(port, e))?;
        let listener = socket.listen(MAX_PENDING_CONNECTIONS).map_err(|e| ServerError::bind(port, e))?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::bind(port, e))?;

        *lock(&self.inner.port) = Some(local_addr.port());
        // only an ephemeral request may legitimately come back different
        if local_addr.port() != port && port != 0 {
            error!(requested = port, bound = local_addr.port(), "listening port does not match requested port");
        }

        let acceptor = match &*lock(&self.inner.tls) {
            Some(tls) => {
                // advertise every registered protocol name via ALPN
                let protocols = registry::registered_protocols();
                Some(tls.acceptor(&protocols)?)
            }
            None => None,
        };

        if acceptor.is_some() {
            info!(port = local_addr.port(), "listening with tls");
        } else {
            info!(port = local_addr.port(), "listening");
        }
        debug!(
            port = local_addr.port(),
            max_pending_connections = MAX_PENDING_CONNECTIONS,
            allow_port_reuse = self.inner.allow_port_reuse.load(Ordering::Relaxed),
            "listener options"
        );

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        *lock(&self.inner.shutdown) = token.clone();
        *lock(&self.inner.connections) = tracker.clone();

        // set synchronously to avoid contention in back to back server
        // start/stop calls
        *lock(&self.inner.state) = ServerState::Started;
        self.inner.lifecycle.perform_start_callbacks();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            accept_loop(&inner, listener, acceptor, token, tracker).await;
            inner.lifecycle.perform_stop_callbacks();
        });

        Ok(())
    }

    /// Creates a server with `delegate` and has it listen on `port`.
    pub fn listen_on(port: u16, delegate: Arc<dyn ServerDelegate>) -> Result<Self, ServerError> {
        let server = Self::new();
        server.set_delegate(delegate);
        server.listen(port)?;
        Ok(server)
    }

    /// Stops listening for new connections.
    ///
    /// The accept loop observes the cancellation at its next wakeup and
    /// exits; active connection tasks are cancelled at their next await
    /// point. Stop callbacks fire once the accept loop has exited.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Adds a listener for the server being started.
    ///
    /// Fires immediately as well when the server has already started.
    pub fn started<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> &Self {
        self.inner.lifecycle.add_start_callback(self.state() == ServerState::Started, callback);
        self
    }

    /// Adds a listener for the server being stopped.
    ///
    /// Fires immediately as well when the server has already stopped.
    pub fn stopped<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> &Self {
        self.inner.lifecycle.add_stop_callback(self.state() == ServerState::Stopped, callback);
        self
    }

    /// Adds a listener for `listen` failing.
    pub fn failed<F: Fn(&ServerError) + Send + Sync + 'static>(&self, callback: F) -> &Self {
        self.inner.lifecycle.add_fail_callback(callback);
        self
    }

    /// Adds a listener for a client connection failing to initialize.
    pub fn client_connection_failed<F: Fn(&ServerError) + Send + Sync + 'static>(&self, callback: F) -> &Self {
        self.inner.lifecycle.add_client_connection_fail_callback(callback);
        self
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts connections until the server leaves `Started` or is cancelled.
async fn accept_loop(
    inner: &Arc<ServerInner>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        if inner.state() != ServerState::Started {
            break;
        }

        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "accepted connection");
                match &acceptor {
                    // the handshake blocks on client reads and must not
                    // stall further accepts
                    Some(acceptor) => {
                        let acceptor = acceptor.clone();
                        let inner = Arc::clone(inner);
                        let token = token.clone();
                        let tracker_handle = tracker.clone();
                        tracker.spawn(async move {
                            initialize_tls_connection(&inner, &acceptor, stream, peer, token, &tracker_handle).await;
                        });
                    }
                    None => dispatch(inner, Connection::plain(stream, peer), DEFAULT_PROTOCOL, token.clone(), &tracker),
                }
            }
            Err(e) => {
                if inner.state() == ServerState::Stopped {
                    warn!(cause = %e, "accept failed after server stopped");
                } else {
                    let error = ServerError::io(e);
                    error!(cause = %error, "failed to accept connection");
                    inner.lifecycle.perform_client_connection_fail_callbacks(&error);
                }
            }
        }
    }

    // a cancelled token means stop() already ran for this listen generation
    if inner.state() == ServerState::Started && !token.is_cancelled() {
        error!("listener closed without stop() being called");
        inner.stop();
    }
}

/// Completes TLS setup for one accepted connection on its own task.
async fn initialize_tls_connection(
    inner: &Arc<ServerInner>,
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
    tracker: &TaskTracker,
) {
    match acceptor.accept(stream).await {
        Ok(tls_stream) => {
            let connection = Connection::tls(tls_stream, peer);
            let protocol = connection.negotiated_protocol().unwrap_or_else(|| DEFAULT_PROTOCOL.to_owned());
            dispatch(inner, connection, &protocol, token, tracker);
        }
        Err(e) => {
            let error = ServerError::handshake(e);
            if inner.state() == ServerState::Stopped {
                warn!(peer = %peer, cause = %error, "client connection failed after server stopped");
            } else {
                error!(peer = %peer, cause = %error, "failed to initialize client connection");
                inner.lifecycle.perform_client_connection_fail_callbacks(&error);
            }
        }
    }
}

/// Hands an initialized connection to the processor registered for its
/// negotiated protocol. A registry miss drops the connection.
fn dispatch(inner: &Arc<ServerInner>, connection: Connection, protocol: &str, token: CancellationToken, tracker: &TaskTracker) {
    let Some(factory) = registry::lookup(protocol) else {
        error!(protocol, peer = %connection.peer_addr(), "negotiated protocol not supported, dropping connection");
        return;
    };

    let delegate = inner
        .delegate
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map_or_else(|| Arc::new(DiscardDelegate) as Arc<dyn ServerDelegate>, Arc::clone);

    let keep_alive = *lock(&inner.keep_alive);
    let processor = factory.create(delegate, keep_alive);
    let peer = connection.peer_addr();

    tracker.spawn(async move {
        tokio::select! {
            () = token.cancelled() => {
                debug!(peer = %peer, "connection task cancelled on server stop");
            }
            result = processor.serve(connection) => {
                if let Err(e) = result {
                    warn!(peer = %peer, cause = %e, "connection closed with error");
                }
            }
        }
    });
}

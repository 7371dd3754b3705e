use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use harbor_http::server::{IncomingRequest, Server, ServerDelegate};
use tokio::io::AsyncWriteExt;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

struct EchoDelegate;

// curl -v -d "hello engine" http://127.0.0.1:8080/echo
#[async_trait]
impl ServerDelegate for EchoDelegate {
    async fn handle(&self, request: &mut IncomingRequest<'_>) {
        info!(method = ?request.method(), url = request.url(), peer = %request.peer_addr(), "handling request");

        let mut body = BytesMut::new();
        if let Err(e) = request.read_all_body(&mut body).await {
            warn!(cause = %e, "failed to read request body");
            return;
        }

        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n", body.len());
        let writer = request.writer();
        let _ = writer.write_all(head.as_bytes()).await;
        let _ = writer.write_all(&body).await;
        let _ = writer.flush().await;
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = Server::new();
    server.set_delegate(Arc::new(EchoDelegate));
    server
        .started(|| info!("server started"))
        .stopped(|| info!("server stopped"))
        .failed(|e| warn!(cause = %e, "server failed to start"))
        .client_connection_failed(|e| warn!(cause = %e, "client connection failed"));

    if let Err(e) = server.listen(8080) {
        warn!(cause = %e, "could not listen on port 8080");
        return;
    }

    tokio::signal::ctrl_c().await.ok();
    server.stop();
}

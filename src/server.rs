//! Connection acceptor (C6)
//!
//! TCP listener plus WebSocket upgrade, one `Session` spawned per
//! accepted connection. Grounded on the teacher's
//! `call_server.rs::start_call_server`/`handle_connection` accept loop,
//! with the handshake swapped from a plain `accept_async` to
//! `accept_hdr_async` so a non-matching upgrade path can be rejected
//! with an HTTP 400 before any `Session` is ever constructed.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::EngineAdapter;
use crate::session::Session;

pub struct ConnectionAcceptor {
    listener: TcpListener,
    upgrade_path: String,
    adapter: Arc<EngineAdapter>,
}

impl ConnectionAcceptor {
    pub async fn bind(
        bind_addr: &str,
        upgrade_path: String,
        adapter: Arc<EngineAdapter>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            upgrade_path,
            adapter,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires, spawning one detached
    /// `Session` task per accepted socket. Never returns an error for a
    /// single failed accept; only a fatal listener error propagates.
    pub async fn serve(&self, shutdown: CancellationToken) -> std::io::Result<()> {
        info!(addr = ?self.local_addr()?, "gateway listening");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let upgrade_path = self.upgrade_path.clone();
            let adapter = self.adapter.clone();
            let session_cancel = shutdown.child_token();

            tokio::spawn(async move {
                Self::handle_connection(stream, peer, upgrade_path, adapter, session_cancel).await;
            });
        }

        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        peer: std::net::SocketAddr,
        upgrade_path: String,
        adapter: Arc<EngineAdapter>,
        cancel: CancellationToken,
    ) {
        let callback = |req: &Request, response: Response| {
            if req.uri().path() != upgrade_path {
                let rejection: ErrorResponse = Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Some("not a valid upgrade path".to_string()))
                    .expect("static rejection response is well-formed");
                return Err(rejection);
            }
            Ok(response)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%peer, error = %e, "websocket handshake failed");
                return;
            }
        };

        let session = Session::new(adapter, cancel);
        info!(%peer, session = %session.handle(), "session accepted");
        session.run(ws_stream).await;
    }
}

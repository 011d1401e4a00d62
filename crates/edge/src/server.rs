//! Edge WebSocket server.
//!
//! Listens on a TCP port, upgrades each connection to WebSocket, and hands
//! it to the coordinator. Runs the dedup sweeper on a fixed cadence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use fireline_protocol::constants::{DEDUP_SWEEP_PERIOD, DEDUP_TTL_MS, DEFAULT_PORT, MAX_FRAME_SIZE};

use crate::ServerError;
use crate::connection::spawn_connection;
use crate::dispatch::Coordinator;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Dedup effect window in milliseconds.
    pub dedup_ttl_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            dedup_ttl_ms: DEDUP_TTL_MS,
        }
    }
}

/// The edge node's WebSocket server.
///
/// Accepts any number of responder connections and dispatches their
/// traffic through the shared [`Coordinator`].
pub struct EdgeServer {
    port: u16,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    next_conn_id: AtomicU64,
}

impl EdgeServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            port: config.port,
            coordinator: Arc::new(Coordinator::new(config.dedup_ttl_ms)),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// The shared coordinator, for inspection.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Gracefully shuts down the server and every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop and the dedup sweeper until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("edge coordinator listening on {local_addr}");

        // Dedup TTL sweep, once per minute.
        {
            let coordinator = Arc::clone(&self.coordinator);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(DEDUP_SWEEP_PERIOD);
                interval.tick().await; // Skip the immediate first tick.
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => coordinator.sweep_dedup().await,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("edge coordinator shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::debug!(%peer_addr, "connection setup failed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection to WebSocket and spawns its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_FRAME_SIZE);
        ws_config.max_frame_size = Some(MAX_FRAME_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%peer_addr, conn = conn_id, "connection established");

        spawn_connection(
            ws_stream,
            conn_id,
            Arc::clone(&self.coordinator),
            self.cancel.clone(),
        );
        Ok(())
    }
}

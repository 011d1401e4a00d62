//! Device-side client for the Fireline edge coordinator.
//!
//! Provides the reliable sender (priority outbox with retry-until-ACK),
//! the snapshot applier that keeps an observable incident view, and the
//! WebSocket transport with automatic reconnection. The outbox survives
//! disconnects; queued intents drain once the edge acknowledges them.

pub mod client;
pub mod outbox;
pub mod transport;
pub mod types;
pub mod view;
pub mod ws;

pub use client::EdgeClient;
pub use outbox::Outbox;
pub use transport::{ConnectFuture, Connection, Connector, Transport, TransportEvent};
pub use types::{ClientConfig, ClientEvent, ConnStatus, ReconnectConfig};
pub use view::IncidentView;
pub use ws::WsConnector;

/// Errors from the device client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

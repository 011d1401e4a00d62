//! Edge-resident coordinator for first-responder devices.
//!
//! A single edge node holds authoritative in-memory state for a set of
//! active incidents and mediates real-time traffic between responder
//! devices over WebSocket: per-incident rooms, handshake and snapshot,
//! per-message acknowledgements with time-bounded deduplication, and
//! presence/SOS/location state that survives reconnects.

mod connection;
mod dedup;
mod dispatch;
mod server;
mod store;

pub use connection::{ConnId, SendError, Sender};
pub use dispatch::Coordinator;
pub use server::{EdgeServer, ServerConfig};
pub use store::{ConnMeta, IncidentStore};

/// Errors produced by the edge server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

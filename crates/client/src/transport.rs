//! Abstract duplex text-frame transport.
//!
//! Any ordered, reliable frame channel satisfies the contract; the
//! production implementation is WebSocket ([`crate::ws`]), tests drive the
//! client over an in-process channel pair.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::ClientError;

/// Events surfaced by an established transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is open; frames may flow.
    Open,
    /// One inbound text frame.
    Frame(String),
    /// The channel is down (peer close, I/O failure, or local close).
    Closed,
}

/// Send half of an established transport.
pub trait Transport: Send + Sync + 'static {
    /// Enqueues one outbound frame without blocking.
    fn send(&self, text: String) -> Result<(), ClientError>;

    /// Tears the channel down. Idempotent.
    fn close(&self);

    /// Whether the channel is currently usable.
    fn is_open(&self) -> bool;
}

/// One established connection: the send handle plus its event stream.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection, ClientError>> + Send>>;

/// Dials fresh connections for the client's reconnect loop.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> ConnectFuture;
}

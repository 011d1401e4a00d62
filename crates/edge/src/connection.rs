//! Per-connection read/write pumps and the buffered send handle.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use fireline_protocol::constants::{MAX_FRAME_SIZE, SEND_BUFFER_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};

use crate::dispatch::Coordinator;

/// Identifies one live connection for the duration of the process.
pub type ConnId = u64;

/// Error returned when the send buffer is full or the connection closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Handle for sending frames to one connected device.
///
/// Cloneable and cheap — wraps an `mpsc::Sender`. Sends never block: a
/// full buffer drops the frame for that peer, which recovers missed state
/// from the snapshot on its next join.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Serializes a frame as JSON text and enqueues it.
    pub fn send_frame<T: Serialize>(&self, frame: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(frame).map_err(|_| SendError)?;
        self.send_text(json)
    }

    /// Enqueues an already-serialized frame.
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.tx.try_send(WsMessage::Text(text.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping frame");
            SendError
        })
    }

    /// Returns `true` while the connection's write pump is alive.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// A sender wired to an in-process receiver instead of a socket, for
    /// exercising the dispatcher without a transport.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        (Self { tx }, rx)
    }
}

/// Spawns the read and write pumps for an upgraded WebSocket connection.
///
/// The pumps stop when the peer closes, the read deadline expires, or the
/// server's cancel token fires; the read pump then reports the close to
/// the coordinator for room cleanup.
pub(crate) fn spawn_connection<S>(
    ws_stream: S,
    conn_id: ConnId,
    coordinator: Arc<Coordinator>,
    server_cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let (ws_sink, ws_read) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    tokio::spawn(async move {
        read_pump(ws_read, &sender, &coordinator, conn_id, cancel.clone()).await;
        // Stop the write pump before touching room state.
        cancel.cancel();
        coordinator.connection_closed(conn_id).await;
        tracing::debug!(conn = conn_id, "connection closed");
    });
}

/// Drains the send channel into the socket and emits keepalive pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::debug!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Reads frames from the socket and dispatches them.
///
/// Any incoming frame resets the read deadline; a silent peer is treated
/// as dead after [`WS_PONG_WAIT`].
async fn read_pump<S>(
    mut stream: S,
    sender: &Sender,
    coordinator: &Coordinator,
    conn_id: ConnId,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Send + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                tracing::warn!(conn = conn_id, "read deadline expired, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match msg {
                            WsMessage::Text(text) => {
                                if text.len() > MAX_FRAME_SIZE {
                                    tracing::warn!(
                                        conn = conn_id,
                                        len = text.len(),
                                        "frame exceeds max size, dropping"
                                    );
                                    continue;
                                }
                                coordinator.handle_frame(conn_id, sender, &text).await;
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => break,
                            // Binary and raw frames have no meaning here.
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(conn = conn_id, "read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_reports_open_until_receiver_drops() {
        let (sender, rx) = Sender::test_pair();
        assert!(sender.is_open());
        drop(rx);
        assert!(!sender.is_open());
    }

    #[tokio::test]
    async fn send_frame_serializes_json() {
        let (sender, mut rx) = Sender::test_pair();
        sender
            .send_frame(&serde_json::json!({"type": "ACK_MSG", "msgId": "m1"}))
            .unwrap();

        match rx.recv().await {
            Some(WsMessage::Text(text)) => {
                let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["msgId"], "m1");
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn send_to_closed_connection_fails() {
        let (sender, rx) = Sender::test_pair();
        drop(rx);
        assert!(sender.send_text("{}".into()).is_err());
    }
}

//! WebSocket implementation of the device transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use fireline_protocol::constants::{MAX_FRAME_SIZE, SEND_BUFFER_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};

use crate::ClientError;
use crate::transport::{ConnectFuture, Connection, Connector, Transport, TransportEvent};

/// Send half of an open WebSocket connection.
pub struct WsTransport {
    tx: mpsc::Sender<WsMessage>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> Result<(), ClientError> {
        self.tx
            .try_send(WsMessage::Text(text.into()))
            .map_err(|_| ClientError::Closed)
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connects to the edge and spawns the connection pumps.
///
/// Resolves once the WebSocket handshake completes; `Open` is the first
/// event on the stream, `Closed` is always the last.
pub async fn connect(url: &str) -> Result<Connection, ClientError> {
    let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_FRAME_SIZE);
    ws_config.max_frame_size = Some(MAX_FRAME_SIZE);
    let (ws_stream, _) =
        tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
    let (write, read) = ws_stream.split();

    let (out_tx, out_rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(SEND_BUFFER_SIZE);
    let open = Arc::new(AtomicBool::new(true));
    let cancel = CancellationToken::new();

    tokio::spawn(write_pump(write, out_rx, cancel.clone()));

    {
        let open = open.clone();
        let cancel = cancel.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let _ = event_tx.send(TransportEvent::Open).await;
            read_pump(read, &event_tx, &out_tx, cancel.clone()).await;
            open.store(false, Ordering::Relaxed);
            // Read side gone; stop the write pump too.
            cancel.cancel();
            let _ = event_tx.send(TransportEvent::Closed).await;
        });
    }

    Ok(Connection {
        transport: Box::new(WsTransport {
            tx: out_tx,
            open,
            cancel,
        }),
        events: event_rx,
    })
}

/// Drains outbound frames into the socket and emits keepalive pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = sink.send(m).await {
                            tracing::debug!("write error: {e}");
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

    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Forwards inbound text frames as events.
///
/// Any incoming frame resets the read deadline; a silent edge is treated
/// as a dead connection after [`WS_PONG_WAIT`].
async fn read_pump<S>(
    mut read: S,
    event_tx: &mpsc::Sender<TransportEvent>,
    out_tx: &mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                tracing::warn!("read deadline expired, closing connection");
                break;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match msg {
                            WsMessage::Text(text) => {
                                let _ = event_tx
                                    .send(TransportEvent::Frame(text.to_string()))
                                    .await;
                            }
                            WsMessage::Ping(data) => {
                                let _ = out_tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!("read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Dials the configured edge URL.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> ConnectFuture {
        let url = self.url.clone();
        Box::pin(async move { connect(&url).await })
    }
}

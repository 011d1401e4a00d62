//! The device-side event loop tying transport, outbox, and view together.
//!
//! Single-threaded cooperative scheduling: the flush tick, ACK handling,
//! and user enqueues all run on one task, so the outbox needs no locking.
//! Disconnects suspend flushing but never drop queued intents; the loop
//! reconnects with backoff and drains the queue after the next handshake.

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use fireline_protocol::envelope::Envelope;
use fireline_protocol::messages::{Ack, AckMsg, ErrorFrame, IncidentSnapshot};
use fireline_protocol::{MessageKind, now_ms};

use crate::outbox::Outbox;
use crate::transport::{Connection, Connector, TransportEvent};
use crate::types::{ClientConfig, ClientEvent, ConnStatus};
use crate::view::IncidentView;

/// Handle to a running device client.
///
/// Enqueue operations never block and work while disconnected; that is
/// the offline-first guarantee. Each call queues a fresh intent; the
/// server's dedup protects against resends of one intent, not against
/// user-level double-taps.
pub struct EdgeClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    view: Arc<StdMutex<IncidentView>>,
}

enum Command {
    Enqueue {
        type_name: String,
        payload: Map<String, Value>,
    },
    Shutdown,
}

impl EdgeClient {
    /// Spawns the event loop and returns the handle plus its event stream.
    pub fn start(
        config: ClientConfig,
        connector: impl Connector,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(256);
        let view = Arc::new(StdMutex::new(IncidentView::default()));

        tokio::spawn(run_loop(config, connector, cmd_rx, events_tx, view.clone()));

        (Self { cmd_tx, view }, events_rx)
    }

    /// Queues a location update.
    pub fn send_location(&self, lat: f64, lng: f64, accuracy: Option<f64>) {
        let mut payload = Map::new();
        payload.insert("lat".into(), lat.into());
        payload.insert("lng".into(), lng.into());
        if let Some(acc) = accuracy {
            payload.insert("accuracy".into(), acc.into());
        }
        self.enqueue("LOCATION_UPDATE", payload);
    }

    /// Queues an SOS raise. Drains ahead of everything else.
    pub fn raise_sos(&self, note: Option<&str>) {
        let mut payload = Map::new();
        if let Some(note) = note {
            payload.insert("note".into(), note.into());
        }
        self.enqueue("SOS_RAISE", payload);
    }

    /// Queues an SOS clear.
    pub fn clear_sos(&self) {
        self.enqueue("SOS_CLEAR", Map::new());
    }

    /// Queues a chat line.
    pub fn send_chat(&self, text: &str) {
        let mut payload = Map::new();
        payload.insert("text".into(), text.into());
        self.enqueue("CHAT_SEND", payload);
    }

    /// Queues an arbitrary data message; the edge passes unrecognized
    /// types through to the room.
    pub fn send_custom(&self, type_name: &str, payload: Map<String, Value>) {
        self.enqueue(type_name, payload);
    }

    fn enqueue(&self, type_name: &str, payload: Map<String, Value>) {
        let _ = self.cmd_tx.send(Command::Enqueue {
            type_name: type_name.to_string(),
            payload,
        });
    }

    /// A snapshot of the observable incident state.
    pub fn view(&self) -> IncidentView {
        self.view.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Stops the event loop and closes the transport.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

async fn run_loop(
    config: ClientConfig,
    connector: impl Connector,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::Sender<ClientEvent>,
    view: Arc<StdMutex<IncidentView>>,
) {
    let mut outbox = Outbox::new(config.resend_after_ms);
    if let Ok(mut v) = view.lock() {
        v.incident_id = Some(config.incident_id.clone());
        v.responder_id = Some(config.responder_id.clone());
    }

    let mut attempt: u32 = 0;

    'session: loop {
        set_status(&view, &events_tx, ConnStatus::Connecting).await;

        // Dial while still accepting enqueues.
        let mut connect_fut = connector.connect();
        let connected = loop {
            tokio::select! {
                result = &mut connect_fut => break result,
                cmd = cmd_rx.recv() => {
                    if handle_command(cmd, &mut outbox) {
                        return;
                    }
                }
            }
        };

        let Connection { transport, mut events } = match connected {
            Ok(conn) => conn,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                tracing::warn!(attempt, error = %e, "connect failed");
                set_status(&view, &events_tx, ConnStatus::Disconnected).await;
                if backoff(&config, attempt, &mut outbox, &mut cmd_rx, &events_tx).await {
                    return;
                }
                continue 'session;
            }
        };

        let mut open = false;
        let mut flush = tokio::time::interval_at(
            tokio::time::Instant::now() + config.flush_tick,
            config.flush_tick,
        );
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = flush.tick(), if open => {
                    if let Some(frame) = outbox.flush_tick(now_ms())
                        && transport.send(frame).is_err()
                    {
                        // Write side is gone; the Closed event follows.
                        tracing::debug!("flush send failed");
                    }
                }

                event = events.recv() => match event {
                    Some(TransportEvent::Open) => {
                        open = true;
                        attempt = 0;
                        // Handshake goes out-of-band, never through the outbox.
                        let hello = serde_json::json!({
                            "type": "CLIENT_HELLO",
                            "incidentId": config.incident_id,
                            "responderId": config.responder_id,
                        });
                        let _ = transport.send(hello.to_string());
                        set_status(&view, &events_tx, ConnStatus::Connected).await;
                    }
                    Some(TransportEvent::Frame(text)) => {
                        handle_frame(&text, &mut outbox, &view, &events_tx).await;
                    }
                    Some(TransportEvent::Closed) | None => {
                        set_status(&view, &events_tx, ConnStatus::Disconnected).await;
                        attempt = attempt.saturating_add(1);
                        if backoff(&config, attempt, &mut outbox, &mut cmd_rx, &events_tx).await {
                            return;
                        }
                        continue 'session;
                    }
                },

                cmd = cmd_rx.recv() => {
                    if handle_command(cmd, &mut outbox) {
                        transport.close();
                        return;
                    }
                }
            }
        }
    }
}

/// Applies one command. Returns `true` on shutdown.
fn handle_command(cmd: Option<Command>, outbox: &mut Outbox) -> bool {
    match cmd {
        Some(Command::Enqueue { type_name, payload }) => {
            outbox.enqueue(type_name, payload);
            false
        }
        Some(Command::Shutdown) | None => true,
    }
}

/// Waits out the backoff delay, still accepting enqueues.
/// Returns `true` when a shutdown command arrived.
async fn backoff(
    config: &ClientConfig,
    attempt: u32,
    outbox: &mut Outbox,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events_tx: &mpsc::Sender<ClientEvent>,
) -> bool {
    let delay = config.reconnect.delay_for_attempt(attempt);
    let _ = events_tx
        .send(ClientEvent::Reconnecting {
            attempt,
            next_retry_secs: delay.as_secs_f64(),
        })
        .await;
    tracing::info!(
        attempt,
        delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
        "reconnecting"
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return false,
            cmd = cmd_rx.recv() => {
                if handle_command(cmd, outbox) {
                    return true;
                }
            }
        }
    }
}

/// Processes one frame from the edge.
async fn handle_frame(
    text: &str,
    outbox: &mut Outbox,
    view: &Arc<StdMutex<IncidentView>>,
    events_tx: &mpsc::Sender<ClientEvent>,
) {
    let env = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!("undecodable frame from edge: {e}");
            return;
        }
    };

    match env.kind {
        MessageKind::AckMsg => {
            if let Ok(ack) = env.parse::<AckMsg>()
                && outbox.acked(&ack.msg_id)
            {
                let _ = events_tx
                    .send(ClientEvent::Delivered { msg_id: ack.msg_id })
                    .await;
            }
        }
        MessageKind::Ack => {
            if let Ok(ack) = env.parse::<Ack>() {
                let _ = events_tx
                    .send(ClientEvent::Joined {
                        incident_id: ack.incident_id,
                    })
                    .await;
            }
        }
        MessageKind::Error => {
            if let Ok(err) = env.parse::<ErrorFrame>() {
                tracing::warn!(error = %err.error, "edge rejected a message");
                let _ = events_tx
                    .send(ClientEvent::ServerError { error: err.error })
                    .await;
            }
        }
        MessageKind::IncidentSnapshot => {
            if let Ok(snap) = env.parse::<IncidentSnapshot>() {
                if let Ok(mut v) = view.lock() {
                    v.apply_snapshot(&snap);
                }
                let _ = events_tx.send(ClientEvent::SnapshotApplied).await;
            }
        }
        _ => {
            if let Ok(mut v) = view.lock() {
                v.apply_broadcast(&env);
            }
            let _ = events_tx.send(ClientEvent::Broadcast(env)).await;
        }
    }
}

async fn set_status(
    view: &Arc<StdMutex<IncidentView>>,
    events_tx: &mpsc::Sender<ClientEvent>,
    status: ConnStatus,
) {
    let changed = match view.lock() {
        Ok(mut v) if v.status != status => {
            v.status = status;
            true
        }
        _ => false,
    };
    if changed {
        let _ = events_tx.send(ClientEvent::StateChanged(status)).await;
    }
}

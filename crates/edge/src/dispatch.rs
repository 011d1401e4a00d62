//! Protocol dispatcher: handshake, data-message handling, room fan-out,
//! and disconnect cleanup.
//!
//! A connection is anonymous until its `CLIENT_HELLO` binds it to an
//! incident room; membership in the metadata map is the joined state.
//! Message-level failures reply `ERROR` to the offender only and never
//! tear down the connection.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use fireline_protocol::envelope::Envelope;
use fireline_protocol::messages::{
    Ack, AckMsg, ChatBroadcast, ChatSend, ClientHello, ErrorFrame, LocationBroadcast,
    LocationUpdate, PresenceLeave, SosClearBroadcast, SosRaise, SosRaiseBroadcast,
};
use fireline_protocol::types::Location;
use fireline_protocol::{MessageKind, now_ms};

use crate::connection::{ConnId, Sender};
use crate::dedup::DedupIndex;
use crate::store::IncidentStore;

/// The edge node's message processor over shared incident state.
///
/// All room, location, SOS, and dedup state lives behind one lock;
/// handlers hold it for the duration of a message so that acknowledgement,
/// mutation, and fan-out of one message are never interleaved with
/// another's. Sends are non-blocking, so a slow peer cannot stall the
/// dispatcher.
pub struct Coordinator {
    state: Mutex<State>,
}

struct State {
    store: IncidentStore,
    dedup: DedupIndex,
}

impl Coordinator {
    pub fn new(dedup_ttl_ms: u64) -> Self {
        Self {
            state: Mutex::new(State {
                store: IncidentStore::default(),
                dedup: DedupIndex::new(dedup_ttl_ms),
            }),
        }
    }

    /// Processes one text frame from a connection.
    pub async fn handle_frame(&self, conn: ConnId, sender: &Sender, text: &str) {
        let env = match Envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(conn, "undecodable frame: {e}");
                reply_error(sender, format!("Invalid message: {e}"));
                return;
            }
        };

        match env.kind {
            MessageKind::ClientHello => self.handle_hello(conn, sender, &env).await,
            _ => self.handle_data(conn, sender, env).await,
        }
    }

    /// `CLIENT_HELLO`: bind the connection, confirm, and emit the room
    /// snapshot. Emitted under the lock so no broadcast can slip in
    /// between `ACK` and `INCIDENT_SNAPSHOT`.
    async fn handle_hello(&self, conn: ConnId, sender: &Sender, env: &Envelope) {
        let hello: ClientHello = match env.parse() {
            Ok(h) => h,
            Err(_) => {
                reply_error(sender, "CLIENT_HELLO requires incidentId and responderId");
                return;
            }
        };
        if hello.incident_id.is_empty() || hello.responder_id.is_empty() {
            reply_error(sender, "CLIENT_HELLO requires incidentId and responderId");
            return;
        }

        let mut state = self.state.lock().await;
        if state.store.meta(conn).is_some() {
            drop(state);
            reply_error(sender, "Already joined");
            return;
        }

        let at = now_ms();
        state
            .store
            .add_connection(conn, sender.clone(), &hello.incident_id, &hello.responder_id);
        let snapshot = state.store.snapshot(&hello.incident_id, at);

        let _ = sender.send_frame(&Ack::joined(&hello.incident_id, at));
        let _ = sender.send_frame(&snapshot);
        drop(state);

        tracing::info!(
            conn,
            incident = %hello.incident_id,
            responder = %hello.responder_id,
            "responder joined"
        );
    }

    /// Any non-hello frame from a joined connection.
    ///
    /// The `msgId` is marked before payload validation, so a repeat of a
    /// rejected message is suppressed like any other duplicate, and the
    /// acknowledgement always goes out: `ACK_MSG` means "stop retrying",
    /// independent of whether the effect occurred.
    async fn handle_data(&self, conn: ConnId, sender: &Sender, env: Envelope) {
        let mut state = self.state.lock().await;

        let Some(meta) = state.store.meta(conn).cloned() else {
            drop(state);
            reply_error(sender, "Must send CLIENT_HELLO before data messages");
            return;
        };
        let Some(msg_id) = env.msg_id.clone() else {
            drop(state);
            reply_error(sender, "Missing msgId");
            return;
        };

        let at = now_ms();
        let first = state.dedup.mark_if_new(&meta.incident_id, &msg_id, at);
        let _ = sender.send_frame(&AckMsg::new(&msg_id, at));
        if !first {
            tracing::debug!(
                conn,
                incident = %meta.incident_id,
                msg_id = %msg_id,
                "duplicate suppressed"
            );
            return;
        }

        match env.kind {
            MessageKind::LocationUpdate => {
                let Ok(update) = env.parse::<LocationUpdate>() else {
                    reply_error(sender, "Invalid coordinates");
                    return;
                };
                let Some(loc) = Location::checked(update.lat, update.lng, update.accuracy, at)
                else {
                    reply_error(sender, "Invalid coordinates");
                    return;
                };
                state.store.set_location(&meta.responder_id, loc.clone());
                let frame =
                    LocationBroadcast::new(&msg_id, &meta.incident_id, &meta.responder_id, &loc);
                broadcast_frame(&state.store, &meta.incident_id, &frame);
            }

            MessageKind::SosRaise => {
                let note = env.parse::<SosRaise>().ok().and_then(|r| r.note);
                let sos = state
                    .store
                    .raise_sos(&meta.incident_id, &meta.responder_id, note, at);
                let frame =
                    SosRaiseBroadcast::new(&msg_id, &meta.incident_id, &meta.responder_id, &sos);
                broadcast_frame(&state.store, &meta.incident_id, &frame);
                tracing::warn!(
                    incident = %meta.incident_id,
                    responder = %meta.responder_id,
                    "SOS raised"
                );
            }

            MessageKind::SosClear => {
                state.store.clear_sos(&meta.incident_id, &meta.responder_id);
                let frame =
                    SosClearBroadcast::new(&msg_id, &meta.incident_id, &meta.responder_id, at);
                broadcast_frame(&state.store, &meta.incident_id, &frame);
            }

            MessageKind::ChatSend => {
                let text = match env.parse::<ChatSend>() {
                    Ok(chat) if !chat.text.is_empty() => chat.text,
                    _ => {
                        reply_error(sender, "Chat text required");
                        return;
                    }
                };
                let frame =
                    ChatBroadcast::new(&msg_id, &meta.incident_id, &meta.responder_id, text, at);
                broadcast_frame(&state.store, &meta.incident_id, &frame);
            }

            // Anything else passes through to the room with the
            // authoritative fields overwritten by the server.
            _ => {
                let mut body = env.into_body();
                body.insert("msgId".into(), Value::String(msg_id));
                body.insert("incidentId".into(), Value::String(meta.incident_id.clone()));
                body.insert("from".into(), Value::String(meta.responder_id.clone()));
                body.insert("at".into(), Value::from(at));
                broadcast_text(&state.store, &meta.incident_id, Value::Object(body).to_string());
            }
        }
    }

    /// Transport close: unbind, announce the departure to the room, and
    /// drop the room if it emptied.
    pub(crate) async fn connection_closed(&self, conn: ConnId) {
        let mut state = self.state.lock().await;
        let Some(meta) = state.store.remove_connection(conn) else {
            return;
        };

        let frame = PresenceLeave::new(&meta.incident_id, &meta.responder_id, now_ms());
        broadcast_frame(&state.store, &meta.incident_id, &frame);
        drop(state);

        tracing::info!(
            conn,
            incident = %meta.incident_id,
            responder = %meta.responder_id,
            "responder left"
        );
    }

    /// One pass of the dedup TTL sweep.
    pub(crate) async fn sweep_dedup(&self) {
        let mut state = self.state.lock().await;
        let removed = state.dedup.sweep(now_ms());
        let tracked = state.dedup.len();
        drop(state);
        if removed > 0 {
            tracing::debug!(removed, tracked, "dedup sweep");
        }
    }

    /// Number of rooms currently alive.
    pub async fn room_count(&self) -> usize {
        self.state.lock().await.store.room_count()
    }
}

fn reply_error(sender: &Sender, error: impl Into<String>) {
    let _ = sender.send_frame(&ErrorFrame::new(error, now_ms()));
}

/// Fans a frame out to every open connection in the room, sender included.
/// Sends to closing peers are no-ops.
fn broadcast_frame<T: Serialize>(store: &IncidentStore, incident_id: &str, frame: &T) {
    if let Ok(text) = serde_json::to_string(frame) {
        broadcast_text(store, incident_id, text);
    }
}

fn broadcast_text(store: &IncidentStore, incident_id: &str, text: String) {
    for meta in store.connections_in(incident_id) {
        if meta.sender.is_open() {
            let _ = meta.sender.send_text(text.clone());
        }
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::MessageKind;
use crate::types::{Location, SosState};

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

/// Handshake binding a connection to an `(incidentId, responderId)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    pub incident_id: String,
    pub responder_id: String,
}

/// Raw coordinates from a device fix. Range validation happens in
/// [`Location::checked`]; `accuracy` is dropped here unless it is a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub accuracy: Option<f64>,
}

/// SOS raise. The note is dropped unless it is a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosRaise {
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: Option<String>,
}

/// Room-wide chat line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub text: String,
}

// ---------------------------------------------------------------------------
// Server frames
// ---------------------------------------------------------------------------

/// Handshake confirmation, emitted before the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub message: String,
    pub incident_id: String,
    pub at: u64,
}

impl Ack {
    pub fn joined(incident_id: impl Into<String>, at: u64) -> Self {
        Self {
            kind: MessageKind::Ack,
            message: "Joined incident".into(),
            incident_id: incident_id.into(),
            at,
        }
    }
}

/// Per-message acknowledgement. Receipt means "stop retrying", independent
/// of whether the effect occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMsg {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg_id: String,
    pub at: u64,
}

impl AckMsg {
    pub fn new(msg_id: impl Into<String>, at: u64) -> Self {
        Self {
            kind: MessageKind::AckMsg,
            msg_id: msg_id.into(),
            at,
        }
    }
}

/// Protocol or validation error, sent to the offending connection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub error: String,
    #[serde(default)]
    pub at: u64,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>, at: u64) -> Self {
        Self {
            kind: MessageKind::Error,
            error: error.into(),
            at,
        }
    }
}

/// The server's authoritative view of a room, emitted to a joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSnapshot {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub incident_id: String,
    pub responders: Vec<String>,
    pub locations: HashMap<String, Location>,
    pub sos: HashMap<String, SosState>,
    pub at: u64,
}

impl IncidentSnapshot {
    pub fn new(
        incident_id: impl Into<String>,
        responders: Vec<String>,
        locations: HashMap<String, Location>,
        sos: HashMap<String, SosState>,
        at: u64,
    ) -> Self {
        Self {
            kind: MessageKind::IncidentSnapshot,
            incident_id: incident_id.into(),
            responders,
            locations,
            sos,
            at,
        }
    }
}

/// Broadcast when a bound connection closes. Not subject to dedup and
/// carries no `msgId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceLeave {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub incident_id: String,
    pub responder_id: String,
    pub at: u64,
}

impl PresenceLeave {
    pub fn new(incident_id: impl Into<String>, responder_id: impl Into<String>, at: u64) -> Self {
        Self {
            kind: MessageKind::PresenceLeave,
            incident_id: incident_id.into(),
            responder_id: responder_id.into(),
            at,
        }
    }
}

// ---------------------------------------------------------------------------
// Room broadcasts (echo the originator's msgId)
// ---------------------------------------------------------------------------

/// Accepted location fix, fanned out to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBroadcast {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg_id: String,
    pub incident_id: String,
    pub responder_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub at: u64,
}

impl LocationBroadcast {
    pub fn new(
        msg_id: impl Into<String>,
        incident_id: impl Into<String>,
        responder_id: impl Into<String>,
        loc: &Location,
    ) -> Self {
        Self {
            kind: MessageKind::LocationUpdate,
            msg_id: msg_id.into(),
            incident_id: incident_id.into(),
            responder_id: responder_id.into(),
            lat: loc.lat,
            lng: loc.lng,
            accuracy: loc.accuracy,
            at: loc.at,
        }
    }
}

/// Accepted SOS raise, fanned out to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosRaiseBroadcast {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg_id: String,
    pub incident_id: String,
    pub responder_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: u64,
}

impl SosRaiseBroadcast {
    pub fn new(
        msg_id: impl Into<String>,
        incident_id: impl Into<String>,
        responder_id: impl Into<String>,
        sos: &SosState,
    ) -> Self {
        Self {
            kind: MessageKind::SosRaise,
            msg_id: msg_id.into(),
            incident_id: incident_id.into(),
            responder_id: responder_id.into(),
            note: sos.note.clone(),
            at: sos.at,
        }
    }
}

/// Accepted SOS clear, fanned out to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosClearBroadcast {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg_id: String,
    pub incident_id: String,
    pub responder_id: String,
    pub at: u64,
}

impl SosClearBroadcast {
    pub fn new(
        msg_id: impl Into<String>,
        incident_id: impl Into<String>,
        responder_id: impl Into<String>,
        at: u64,
    ) -> Self {
        Self {
            kind: MessageKind::SosClear,
            msg_id: msg_id.into(),
            incident_id: incident_id.into(),
            responder_id: responder_id.into(),
            at,
        }
    }
}

/// Chat line, fanned out to the room. Stateless on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg_id: String,
    pub incident_id: String,
    pub from: String,
    pub text: String,
    pub at: u64,
}

impl ChatBroadcast {
    pub fn new(
        msg_id: impl Into<String>,
        incident_id: impl Into<String>,
        from: impl Into<String>,
        text: impl Into<String>,
        at: u64,
    ) -> Self {
        Self {
            kind: MessageKind::ChatSend,
            msg_id: msg_id.into(),
            incident_id: incident_id.into(),
            from: from.into(),
            text: text.into(),
            at,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Keeps the value only when it is a finite JSON number.
fn lenient_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    Ok(value.and_then(|v| v.as_f64()).filter(|f| f.is_finite()))
}

/// Keeps the value only when it is a JSON string.
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    }))
}

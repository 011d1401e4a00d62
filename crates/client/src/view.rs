//! Observable incident state kept on the device.
//!
//! A snapshot replaces the collections wholesale; room broadcasts apply
//! incrementally. On disconnect the collections are preserved so the UI
//! can keep showing stale-but-useful data.

use std::collections::HashMap;

use fireline_protocol::MessageKind;
use fireline_protocol::envelope::Envelope;
use fireline_protocol::messages::{
    IncidentSnapshot, LocationBroadcast, PresenceLeave, SosClearBroadcast, SosRaiseBroadcast,
};
use fireline_protocol::types::{Location, SosState};

use crate::types::ConnStatus;

/// The device's view of its incident.
#[derive(Debug, Clone)]
pub struct IncidentView {
    pub status: ConnStatus,
    pub incident_id: Option<String>,
    pub responder_id: Option<String>,
    pub responders: Vec<String>,
    pub locations: HashMap<String, Location>,
    pub sos: HashMap<String, SosState>,
}

impl Default for IncidentView {
    fn default() -> Self {
        Self {
            status: ConnStatus::Disconnected,
            incident_id: None,
            responder_id: None,
            responders: Vec::new(),
            locations: HashMap::new(),
            sos: HashMap::new(),
        }
    }
}

impl IncidentView {
    /// Replaces the collections with the server's authoritative snapshot.
    pub fn apply_snapshot(&mut self, snap: &IncidentSnapshot) {
        self.incident_id = Some(snap.incident_id.clone());
        self.responders = snap.responders.clone();
        self.locations = snap.locations.clone();
        self.sos = snap.sos.clone();
    }

    /// Applies one room broadcast incrementally.
    ///
    /// Idempotent: re-applying a frame (including the self-echo of a local
    /// action) lands on the same state.
    pub fn apply_broadcast(&mut self, env: &Envelope) {
        match env.kind {
            MessageKind::LocationUpdate => {
                if let Ok(b) = env.parse::<LocationBroadcast>()
                    && let Some(loc) = Location::checked(b.lat, b.lng, b.accuracy, b.at)
                {
                    self.locations.insert(b.responder_id, loc);
                }
            }
            MessageKind::SosRaise => {
                if let Ok(b) = env.parse::<SosRaiseBroadcast>() {
                    self.sos
                        .insert(b.responder_id, SosState { note: b.note, at: b.at });
                }
            }
            MessageKind::SosClear => {
                if let Ok(b) = env.parse::<SosClearBroadcast>() {
                    self.sos.remove(&b.responder_id);
                }
            }
            MessageKind::PresenceLeave => {
                if let Ok(b) = env.parse::<PresenceLeave>() {
                    self.responders.retain(|r| r != &b.responder_id);
                }
            }
            // Chat and passthrough messages carry no view state.
            _ => {}
        }
    }
}

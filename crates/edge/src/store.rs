//! In-memory incident state: rooms, connection metadata, last-known
//! locations, and active SOS.

use std::collections::{HashMap, HashSet};

use fireline_protocol::messages::IncidentSnapshot;
use fireline_protocol::types::{Location, SosState};

use crate::connection::{ConnId, Sender};

/// Binding of one connection to a responder identity within an incident.
#[derive(Clone)]
pub struct ConnMeta {
    pub incident_id: String,
    pub responder_id: String,
    pub sender: Sender,
}

/// Authoritative room and responder state for the edge node.
///
/// Rooms hold connection ids directly; responder membership is derived
/// from the live connection set, so presence can never go stale. Locations
/// and SOS are keyed by responder identity instead, which is what lets a
/// reconnecting responder recover state without replay.
#[derive(Default)]
pub struct IncidentStore {
    rooms: HashMap<String, HashSet<ConnId>>,
    meta: HashMap<ConnId, ConnMeta>,
    locations: HashMap<String, Location>,
    sos: HashMap<String, HashMap<String, SosState>>,
}

impl IncidentStore {
    /// Binds a connection into a room, creating the room lazily.
    pub fn add_connection(
        &mut self,
        conn: ConnId,
        sender: Sender,
        incident_id: &str,
        responder_id: &str,
    ) {
        self.rooms
            .entry(incident_id.to_string())
            .or_default()
            .insert(conn);
        self.meta.insert(
            conn,
            ConnMeta {
                incident_id: incident_id.to_string(),
                responder_id: responder_id.to_string(),
                sender,
            },
        );
    }

    /// Unbinds a connection. Deletes the room when it empties; locations
    /// and SOS are left untouched for the responder's next session.
    pub fn remove_connection(&mut self, conn: ConnId) -> Option<ConnMeta> {
        let meta = self.meta.remove(&conn)?;
        if let Some(room) = self.rooms.get_mut(&meta.incident_id) {
            room.remove(&conn);
            if room.is_empty() {
                self.rooms.remove(&meta.incident_id);
            }
        }
        Some(meta)
    }

    /// Metadata for a bound connection, `None` before its handshake.
    pub fn meta(&self, conn: ConnId) -> Option<&ConnMeta> {
        self.meta.get(&conn)
    }

    /// Responder ids currently present in a room, derived from the live
    /// connection set. Iteration order is not stable.
    pub fn responder_ids_in(&self, incident_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for conn in self.rooms.get(incident_id).into_iter().flatten() {
            if let Some(meta) = self.meta.get(conn)
                && !ids.contains(&meta.responder_id)
            {
                ids.push(meta.responder_id.clone());
            }
        }
        ids
    }

    /// Connection bindings currently in a room.
    pub fn connections_in(&self, incident_id: &str) -> Vec<&ConnMeta> {
        self.rooms
            .get(incident_id)
            .into_iter()
            .flatten()
            .filter_map(|conn| self.meta.get(conn))
            .collect()
    }

    /// Records a validated location for a responder.
    pub fn set_location(&mut self, responder_id: &str, loc: Location) {
        self.locations.insert(responder_id.to_string(), loc);
    }

    /// Last-known location of a responder, regardless of room presence.
    pub fn location_of(&self, responder_id: &str) -> Option<&Location> {
        self.locations.get(responder_id)
    }

    /// Locations of responders currently in the room that have one stored.
    pub fn locations_for(&self, incident_id: &str) -> HashMap<String, Location> {
        self.responder_ids_in(incident_id)
            .into_iter()
            .filter_map(|id| self.locations.get(&id).map(|loc| (id, loc.clone())))
            .collect()
    }

    /// Raises (or overwrites) SOS for a responder in an incident and
    /// returns the stored state.
    pub fn raise_sos(
        &mut self,
        incident_id: &str,
        responder_id: &str,
        note: Option<String>,
        at: u64,
    ) -> SosState {
        let state = SosState { note, at };
        self.sos
            .entry(incident_id.to_string())
            .or_default()
            .insert(responder_id.to_string(), state.clone());
        state
    }

    /// Clears SOS for a responder; drops the incident map when it empties.
    pub fn clear_sos(&mut self, incident_id: &str, responder_id: &str) {
        if let Some(entries) = self.sos.get_mut(incident_id) {
            entries.remove(responder_id);
            if entries.is_empty() {
                self.sos.remove(incident_id);
            }
        }
    }

    /// All active SOS in an incident.
    pub fn sos_for(&self, incident_id: &str) -> HashMap<String, SosState> {
        self.sos.get(incident_id).cloned().unwrap_or_default()
    }

    /// Synthesizes the authoritative snapshot emitted to a joiner.
    pub fn snapshot(&self, incident_id: &str, at: u64) -> IncidentSnapshot {
        IncidentSnapshot::new(
            incident_id,
            self.responder_ids_in(incident_id),
            self.locations_for(incident_id),
            self.sos_for(incident_id),
            at,
        )
    }

    /// Number of rooms currently alive.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Whether a room currently exists.
    pub fn has_room(&self, incident_id: &str) -> bool {
        self.rooms.contains_key(incident_id)
    }
}

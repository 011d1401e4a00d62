//! Public types for the device client.

use std::time::Duration;

use fireline_protocol::constants::{FLUSH_TICK, RESEND_AFTER_MS};
use fireline_protocol::envelope::Envelope;

/// Connection status surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Incident this device coordinates in.
    pub incident_id: String,
    /// Stable responder identity, preserved across reconnects.
    pub responder_id: String,
    /// How long an in-flight item waits for its ACK before a resend.
    pub resend_after_ms: u64,
    /// Outbox flush cadence while the transport is open.
    pub flush_tick: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(incident_id: impl Into<String>, responder_id: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            responder_id: responder_id.into(),
            resend_after_ms: RESEND_AFTER_MS,
            flush_tick: FLUSH_TICK,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Events emitted by the client's event loop.
#[derive(Debug)]
pub enum ClientEvent {
    /// Connection status changed.
    StateChanged(ConnStatus),
    /// The edge confirmed the handshake.
    Joined { incident_id: String },
    /// A room snapshot replaced the local collections.
    SnapshotApplied,
    /// The edge acknowledged an outbox item; it will not be resent.
    Delivered { msg_id: String },
    /// A room broadcast arrived (already applied to the view).
    Broadcast(Envelope),
    /// The edge rejected a message. The corresponding item, if any, is
    /// still retired by its `ACK_MSG`.
    ServerError { error: String },
    /// Reconnection is in progress.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
}

/// Configuration for automatic reconnection backoff.
///
/// The delay target doubles per consecutive failure, from `floor` up to
/// `ceiling`. Each wait keeps half its target and randomizes the rest,
/// so a crew of devices that lost the same edge node does not redial in
/// lockstep. The ceiling is sized for degraded networks where an edge
/// node can stay unreachable for a while.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay target for the first retry.
    pub floor: Duration,
    /// Upper bound of the doubling schedule.
    pub ceiling: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(400),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Wait before reconnect attempt `attempt` (1-based): equal jitter
    /// over the doubling schedule, drawn from `[target/2, target]`.
    ///
    /// Randomness comes from the v4 UUID generator that already mints
    /// outbox `msgId`s, so the client carries no separate entropy source.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        let target = self.floor.saturating_mul(1u32 << doublings).min(self.ceiling);
        let half = target / 2;
        half + Duration::from_secs_f64(half.as_secs_f64() * uuid_fraction())
    }
}

/// Uniform value in `[0, 1)` taken from the leading bytes of a v4 UUID.
fn uuid_fraction() -> f64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    f64::from(raw) / (f64::from(u32::MAX) + 1.0)
}

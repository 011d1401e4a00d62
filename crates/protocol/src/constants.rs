use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TCP port the edge coordinator listens on.
pub const DEFAULT_PORT: u16 = 3000;

/// How long a seen `msgId` suppresses re-execution of its effect.
///
/// Sized to cover realistic disconnect windows on degraded networks. A
/// replay past this window is treated as new intent (at-least-once beyond
/// the window).
pub const DEDUP_TTL_MS: u64 = 15 * 60 * 1000;

/// Cadence of the background dedup TTL sweep.
pub const DEDUP_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// How long the client waits for an `ACK_MSG` before resending an
/// in-flight outbox item.
pub const RESEND_AFTER_MS: u64 = 1_500;

/// Cadence of the client outbox flush tick. Bounds worst-case extra retry
/// latency.
pub const FLUSH_TICK: Duration = Duration::from_millis(300);

/// Maximum accepted frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Per-connection send buffer capacity.
///
/// A full buffer makes `try_send` drop the frame for that peer; the peer
/// recovers the missed state from the snapshot on its next join.
pub const SEND_BUFFER_SIZE: usize = 256;

/// How often each side sends WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline: if nothing arrives within this window the connection is
/// considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(45);

/// Wire message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    // Handshake
    #[serde(rename = "CLIENT_HELLO")]
    ClientHello,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "INCIDENT_SNAPSHOT")]
    IncidentSnapshot,

    // Reliability
    #[serde(rename = "ACK_MSG")]
    AckMsg,
    #[serde(rename = "ERROR")]
    Error,

    // Data messages (client to server, rebroadcast to the room)
    #[serde(rename = "LOCATION_UPDATE")]
    LocationUpdate,
    #[serde(rename = "SOS_RAISE")]
    SosRaise,
    #[serde(rename = "SOS_CLEAR")]
    SosClear,
    #[serde(rename = "CHAT_SEND")]
    ChatSend,

    // Server-originated presence
    #[serde(rename = "PRESENCE_LEAVE")]
    PresenceLeave,

    /// Forward compatibility: unrecognized tags land here. The envelope
    /// retains the original tag so the server can pass the message through.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Maps a wire tag to its kind. Unrecognized tags map to [`Unknown`].
    ///
    /// [`Unknown`]: MessageKind::Unknown
    pub fn parse(tag: &str) -> Self {
        match tag {
            "CLIENT_HELLO" => Self::ClientHello,
            "ACK" => Self::Ack,
            "INCIDENT_SNAPSHOT" => Self::IncidentSnapshot,
            "ACK_MSG" => Self::AckMsg,
            "ERROR" => Self::Error,
            "LOCATION_UPDATE" => Self::LocationUpdate,
            "SOS_RAISE" => Self::SosRaise,
            "SOS_CLEAR" => Self::SosClear,
            "CHAT_SEND" => Self::ChatSend,
            "PRESENCE_LEAVE" => Self::PresenceLeave,
            _ => Self::Unknown,
        }
    }

    /// Outbox drain priority. Lower is more urgent; ties break by
    /// insertion order.
    pub fn priority(self) -> u8 {
        match self {
            Self::SosRaise | Self::SosClear => 0,
            Self::LocationUpdate => 2,
            Self::ChatSend => 3,
            _ => 5,
        }
    }
}

//! Wire protocol shared by the Fireline edge coordinator and responder
//! clients.
//!
//! Frames are WebSocket text messages carrying one flat JSON object tagged
//! by a `type` field. Client-originated data messages additionally carry a
//! client-generated `msgId` used for acknowledgement and server-side
//! deduplication.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use constants::MessageKind;
pub use envelope::{Envelope, ProtocolError};
pub use types::{Location, SosState};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in epoch milliseconds.
///
/// Stamped into every server-emitted frame as `at`. Clients treat these as
/// opaque ordering hints, not authoritative time.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

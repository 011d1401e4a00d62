use serde::{Deserialize, Serialize};

/// Last-known position of a responder.
///
/// Keyed by responder identity, not connection identity, so it survives
/// disconnects. Only validated coordinates are ever stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Server-assigned acceptance time, epoch milliseconds.
    pub at: u64,
}

impl Location {
    /// Builds a location from raw coordinates.
    ///
    /// Returns `None` when `lat` is outside [-90, 90] or `lng` outside
    /// [-180, 180]. `accuracy` is kept only when finite and non-negative;
    /// a bad accuracy is dropped, not fatal.
    pub fn checked(lat: f64, lng: f64, accuracy: Option<f64>, at: u64) -> Option<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        let accuracy = accuracy.filter(|a| a.is_finite() && *a >= 0.0);
        Some(Self {
            lat,
            lng,
            accuracy,
            at,
        })
    }
}

/// An active SOS raised by a responder within an incident.
///
/// Present iff the responder is currently raising SOS there; cleared
/// explicitly, never by disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Server-assigned raise time, epoch milliseconds.
    pub at: u64,
}

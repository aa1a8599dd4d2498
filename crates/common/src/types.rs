// Core domain types shared across all Waypoint crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a user account row in the account store.
pub type UserId = i64;

/// Identity of a chat room row.
pub type RoomId = i64;

/// Identity of a persisted chat message row.
pub type MessageId = i64;

/// A verified identity, produced by the session provider and handed to
/// the realtime engine when a socket is admitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
}

/// A raw location fix as reported by a client.
///
/// Only `lat`/`lon` are required; accuracy, speed, and heading are
/// optional refinements, and `timestamp` is the client's own clock in
/// epoch milliseconds (the server records its own receive time
/// separately).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationFix {
    /// A fix with only coordinates, no optional refinements.
    pub fn at(lat: f64, lon: f64) -> Self {
        Self { lat, lon, accuracy: None, speed: None, heading: None, timestamp: None }
    }
}

// WebSocket message types for the waypoint realtime protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LocationFix, MessageId, RoomId, UserId};

/// All client -> server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Initial handshake; must be the first frame on the socket.
    Hello { session_token: String },

    /// Best-effort location telemetry.
    UpdateLocation(LocationFix),

    /// Post a chat message to a room.
    SendMessage { room_id: RoomId, content: String },

    /// Find or create the private room shared with another user.
    InitiatePrivateChat { target_user_id: UserId },

    /// Latency probe; echoed back verbatim as `pong`.
    Ping { ts: i64 },

    /// Explicit background flag from mobile clients.
    BackgroundMode { in_background: bool },

    /// App lifecycle notice; updates activity state, never broadcast.
    AppGoingBackground,

    /// App lifecycle notice; updates activity state, never broadcast.
    AppGoingForeground,
}

/// All server -> client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgement carrying the verified identity.
    HelloAck {
        server_time: DateTime<Utc>,
        user_id: UserId,
        username: String,
        is_admin: bool,
    },

    /// Full roster of currently-connected users; replaces client state.
    PresenceUpdate { users: Vec<PresenceBroadcastEntry> },

    /// A chat message delivered to an online room participant.
    NewMessage(ChatMessage),

    /// A private room was resolved; sent to both participants.
    ChatStarted { room_id: RoomId, room_name: String },

    /// Latency probe echo.
    Pong { ts: i64 },

    /// Server -> client error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

/// One connected user's entry in the presence roster broadcast.
///
/// `lat`/`lon` are `null` until the first accepted fix; the optional
/// refinements are omitted entirely until reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceBroadcastEntry {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Distance in kilometers moved between the two most recent fixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_moved: Option<f64>,
    /// Server receive time of the most recent accepted fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fix_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
    #[serde(default)]
    pub in_background: bool,
}

/// A persisted chat message as delivered to online participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_type_tagged() {
        let frame: ClientMessage =
            serde_json::from_str(r#"{"type": "hello", "session_token": "tok-1"}"#)
                .expect("hello frame");
        assert_eq!(frame, ClientMessage::Hello { session_token: "tok-1".into() });
    }

    #[test]
    fn update_location_flattens_fix_fields() {
        let frame: ClientMessage = serde_json::from_str(
            r#"{"type": "update_location", "lat": 54.0, "lon": 25.0, "accuracy": 4.5}"#,
        )
        .expect("location frame");
        match frame {
            ClientMessage::UpdateLocation(fix) => {
                assert_eq!(fix.lat, 54.0);
                assert_eq!(fix.accuracy, Some(4.5));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn lifecycle_frames_have_no_payload() {
        let frame: ClientMessage =
            serde_json::from_str(r#"{"type": "app_going_background"}"#).expect("lifecycle frame");
        assert_eq!(frame, ClientMessage::AppGoingBackground);
    }

    #[test]
    fn presence_entry_omits_unreported_refinements() {
        let entry = PresenceBroadcastEntry {
            user_id: 1,
            username: "ruta".into(),
            is_admin: false,
            lat: None,
            lon: None,
            accuracy: None,
            speed: None,
            heading: None,
            distance_moved: None,
            last_fix_at: None,
            connected_at: Utc::now(),
            in_background: false,
        };
        let json = serde_json::to_value(&entry).expect("serialize entry");
        assert!(json["lat"].is_null(), "lat should be explicit null before the first fix");
        assert!(json.get("accuracy").is_none(), "accuracy should be omitted entirely");
        assert!(json.get("distance_moved").is_none());
    }

    #[test]
    fn new_message_serializes_flat() {
        let message = ServerMessage::NewMessage(ChatMessage {
            id: 9,
            room_id: 3,
            sender_id: 1,
            sender_username: "ruta".into(),
            content: "labas".into(),
            created_at: Utc::now(),
        });
        let json = serde_json::to_value(&message).expect("serialize message");
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["room_id"], 3);
        assert_eq!(json["content"], "labas");
    }

    #[test]
    fn error_frame_roundtrips() {
        let frame = ServerMessage::Error {
            code: "NOT_A_PARTICIPANT".into(),
            message: "sender is not a participant of room 4".into(),
            retryable: false,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        let parsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(frame, parsed);
    }
}

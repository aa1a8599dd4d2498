use chrono::Utc;
use serde_json::Value;
use waypoint_common::protocol::ws::{
    ChatMessage, ClientMessage, PresenceBroadcastEntry, ServerMessage,
};
use waypoint_common::types::LocationFix;

const SERVER_ERROR_SOURCE: &str = include_str!("../src/error.rs");
const SERVER_CHAT_SOURCE: &str = include_str!("../src/chat/mod.rs");
const SERVER_CONFIG_SOURCE: &str = include_str!("../src/config.rs");

#[test]
fn websocket_contract_client_frames_match_spec() {
    let samples = [
        (
            ClientMessage::Hello { session_token: "session-token".to_string() },
            "hello",
            &["type", "session_token"][..],
        ),
        (
            ClientMessage::UpdateLocation(LocationFix {
                lat: 54.6872,
                lon: 25.2797,
                accuracy: Some(5.0),
                speed: Some(1.4),
                heading: Some(180.0),
                timestamp: Some(Utc::now()),
            }),
            "update_location",
            &["type", "lat", "lon", "accuracy", "speed", "heading", "timestamp"][..],
        ),
        (
            ClientMessage::SendMessage { room_id: 3, content: "labas".to_string() },
            "send_message",
            &["type", "room_id", "content"][..],
        ),
        (
            ClientMessage::InitiatePrivateChat { target_user_id: 2 },
            "initiate_private_chat",
            &["type", "target_user_id"][..],
        ),
        (ClientMessage::Ping { ts: 1_700_000_000_000 }, "ping", &["type", "ts"][..]),
        (
            ClientMessage::BackgroundMode { in_background: true },
            "background_mode",
            &["type", "in_background"][..],
        ),
        (ClientMessage::AppGoingBackground, "app_going_background", &["type"][..]),
        (ClientMessage::AppGoingForeground, "app_going_foreground", &["type"][..]),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(message).expect("client frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn websocket_contract_server_frames_match_spec() {
    let samples = [
        (
            ServerMessage::HelloAck {
                server_time: Utc::now(),
                user_id: 1,
                username: "ruta".to_string(),
                is_admin: false,
            },
            "hello_ack",
            &["type", "server_time", "user_id", "username", "is_admin"][..],
        ),
        (
            ServerMessage::PresenceUpdate {
                users: vec![PresenceBroadcastEntry {
                    user_id: 1,
                    username: "ruta".to_string(),
                    is_admin: false,
                    lat: Some(54.6872),
                    lon: Some(25.2797),
                    accuracy: None,
                    speed: None,
                    heading: None,
                    distance_moved: None,
                    last_fix_at: None,
                    connected_at: Utc::now(),
                    in_background: false,
                }],
            },
            "presence_update",
            &["type", "users"][..],
        ),
        (
            ServerMessage::NewMessage(ChatMessage {
                id: 9,
                room_id: 3,
                sender_id: 1,
                sender_username: "ruta".to_string(),
                content: "labas".to_string(),
                created_at: Utc::now(),
            }),
            "new_message",
            &["type", "id", "room_id", "sender_id", "sender_username", "content", "created_at"][..],
        ),
        (
            ServerMessage::ChatStarted { room_id: 3, room_name: "jonas".to_string() },
            "chat_started",
            &["type", "room_id", "room_name"][..],
        ),
        (ServerMessage::Pong { ts: 1_700_000_000_000 }, "pong", &["type", "ts"][..]),
        (
            ServerMessage::Error {
                code: "NOT_A_PARTICIPANT".to_string(),
                message: "sender is not a participant of room 3".to_string(),
                retryable: false,
            },
            "error",
            &["type", "code", "message", "retryable"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(message).expect("server frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn websocket_contract_optional_fields_are_omitted_when_absent() {
    let minimal_fix = ClientMessage::UpdateLocation(LocationFix::at(54.6872, 25.2797));
    let unlocated_entry = PresenceBroadcastEntry {
        user_id: 1,
        username: "ruta".to_string(),
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

    let fix_json = serde_json::to_value(minimal_fix).expect("fix should serialize");
    let entry_json = serde_json::to_value(unlocated_entry).expect("entry should serialize");

    assert!(!object_keys(&fix_json).contains(&"accuracy".to_string()));
    assert!(!object_keys(&fix_json).contains(&"timestamp".to_string()));
    // Coordinates stay present as explicit nulls before the first fix;
    // the refinements disappear entirely.
    assert!(entry_json["lat"].is_null());
    assert!(!object_keys(&entry_json).contains(&"distance_moved".to_string()));
    assert!(!object_keys(&entry_json).contains(&"last_fix_at".to_string()));
}

#[test]
fn websocket_contract_error_codes_match_spec() {
    let expected_codes = [
        "UNAUTHENTICATED",
        "INVALID_CONTENT",
        "NOT_A_PARTICIPANT",
        "NOT_ONLINE",
        "UNKNOWN_USER",
        "SELF_CHAT",
        "INVALID_MESSAGE",
        "STORAGE",
    ];
    for code in expected_codes {
        assert!(
            SERVER_ERROR_SOURCE.contains(&format!("\"{code}\"")),
            "error code registry must declare `{code}`",
        );
    }
    // Storage is the only retryable class.
    assert!(SERVER_ERROR_SOURCE.contains("matches!(self, Self::Storage)"));
}

#[test]
fn websocket_contract_message_limit_and_heartbeat_match_spec() {
    let max_message_chars = parse_u64_const(SERVER_CHAT_SOURCE, "MAX_MESSAGE_CHARS");
    assert_eq!(max_message_chars, 1000);

    assert!(SERVER_CONFIG_SOURCE.contains("\"WAYPOINT_SERVER_HEARTBEAT_INTERVAL_MS\", 10_000"));
    assert!(SERVER_CONFIG_SOURCE.contains("\"WAYPOINT_SERVER_HEARTBEAT_TIMEOUT_MS\", 30_000"));
    assert!(SERVER_CONFIG_SOURCE.contains("\"WAYPOINT_SERVER_PRESENCE_DEBOUNCE_MS\", 0"));
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}

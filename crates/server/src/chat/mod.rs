// Message fan-out and private chat initiation.
//
// Delivery is socket-addressed, not topic-addressed: a persisted
// message is pushed to each room participant who currently holds a
// presence entry, the sender included. Offline participants catch up
// through the history fetch owned by the HTTP layer.

use tracing::debug;
use waypoint_common::protocol::ws::{ChatMessage, ServerMessage};
use waypoint_common::types::{Identity, RoomId, UserId};

use crate::error::EngineError;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomStore;

/// Maximum accepted message length, in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Validate, persist, and deliver a chat message.
///
/// Validation short-circuits: content first, then room membership.
/// Nothing is persisted or delivered unless both pass.
pub async fn send_message(
    rooms: &RoomStore,
    registry: &PresenceRegistry,
    sender: &Identity,
    room_id: RoomId,
    raw_content: &str,
) -> Result<ChatMessage, EngineError> {
    let content = raw_content.trim();
    if content.is_empty() {
        return Err(EngineError::InvalidContent("message is empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(EngineError::InvalidContent("message exceeds 1000 characters"));
    }

    if !rooms.is_participant(room_id, sender.user_id).await? {
        return Err(EngineError::NotAParticipant(room_id));
    }

    let (id, created_at) = rooms.insert_message(room_id, sender.user_id, content).await?;
    let message = ChatMessage {
        id,
        room_id,
        sender_id: sender.user_id,
        sender_username: sender.username.clone(),
        content: content.to_owned(),
        created_at,
    };

    let participants = rooms.participants_of(room_id).await?;
    let delivered = registry
        .deliver(&participants, ServerMessage::NewMessage(message.clone()))
        .await;
    debug!(
        message_id = id,
        room_id,
        sender = %sender.username,
        delivered,
        "message fanned out"
    );

    Ok(message)
}

/// Resolve the private room with `target` and notify both sides.
///
/// Each participant's `chat_started` frame names the *other* user, so
/// the client can label the conversation. The target may be offline;
/// they discover the room on their next connection.
pub async fn start_private_chat(
    rooms: &RoomStore,
    registry: &PresenceRegistry,
    initiator: &Identity,
    target: UserId,
) -> Result<RoomId, EngineError> {
    let resolved = rooms.resolve_private_room(initiator.user_id, target).await?;

    registry
        .send_to(
            initiator.user_id,
            ServerMessage::ChatStarted {
                room_id: resolved.room_id,
                room_name: resolved.target_username.clone(),
            },
        )
        .await;
    let target_reached = registry
        .send_to(
            target,
            ServerMessage::ChatStarted {
                room_id: resolved.room_id,
                room_name: initiator.username.clone(),
            },
        )
        .await;
    if !target_reached {
        debug!(target, room_id = resolved.room_id, "chat target is offline");
    }

    Ok(resolved.room_id)
}

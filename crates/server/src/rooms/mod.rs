// Room storage and the private-room resolver.
//
// Durable rooms and messages are owned by the external relational
// store; this module is the narrow query interface plus the
// find-or-create resolution logic. Find-or-create is race-safe via a
// UNIQUE pair key: the insert is attempted first, and a conflict means
// another resolver won, so the winner is re-queried and returned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::debug;
use waypoint_common::types::{MessageId, RoomId, UserId};

use crate::error::EngineError;

/// Queries rooms, participants, and messages in the external store.
///
/// The Memory variant backs tests with the same atomicity guarantees
/// (one mutex serializes every operation).
#[derive(Clone)]
pub enum RoomStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<Mutex<MemoryRooms>>),
}

/// Result of a successful private-room resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoom {
    pub room_id: RoomId,
    pub target_username: String,
}

#[derive(Default)]
pub struct MemoryRooms {
    usernames: HashMap<UserId, String>,
    rooms: HashMap<RoomId, RoomRecord>,
    next_room_id: RoomId,
    messages: Vec<StoredMessage>,
    next_message_id: MessageId,
}

struct RoomRecord {
    is_public: bool,
    participants: Vec<UserId>,
}

struct StoredMessage {
    #[allow(dead_code)]
    id: MessageId,
    room_id: RoomId,
    #[allow(dead_code)]
    sender_id: UserId,
    #[allow(dead_code)]
    content: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Normalized "min:max" key identifying a private participant pair.
fn pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

impl RoomStore {
    /// Find or atomically create the unique private room for a pair.
    ///
    /// Self-chat is rejected before any store access; an unknown target
    /// fails without side effects.
    pub async fn resolve_private_room(
        &self,
        initiator: UserId,
        target: UserId,
    ) -> Result<ResolvedRoom, EngineError> {
        if initiator == target {
            return Err(EngineError::SelfChat);
        }

        let Some(target_username) = self.lookup_username(target).await? else {
            return Err(EngineError::UnknownUser(target));
        };

        let room_id = match self.find_private_room(initiator, target).await? {
            Some(existing) => existing,
            None => {
                let created = self.create_private_room(initiator, target).await?;
                debug!(room_id = created, initiator, target, "created private room");
                created
            }
        };

        Ok(ResolvedRoom { room_id, target_username })
    }

    /// The existing non-public room in which both users participate.
    pub async fn find_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<RoomId>, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let room_id = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT rp1.room_id
                    FROM room_participants AS rp1
                    INNER JOIN room_participants AS rp2
                        ON rp1.room_id = rp2.room_id
                    INNER JOIN chat_rooms AS cr
                        ON cr.id = rp1.room_id
                    WHERE rp1.user_id = $1
                      AND rp2.user_id = $2
                      AND cr.is_public = FALSE
                    "#,
                )
                .bind(user_a)
                .bind(user_b)
                .fetch_optional(pool)
                .await?;
                Ok(room_id)
            }
            Self::Memory(store) => {
                let guard = store.lock().await;
                Ok(guard
                    .rooms
                    .iter()
                    .find(|(_, room)| {
                        !room.is_public
                            && room.participants.contains(&user_a)
                            && room.participants.contains(&user_b)
                    })
                    .map(|(id, _)| *id))
            }
        }
    }

    /// Create the private room and both participant rows as one atomic
    /// unit. A concurrent creation for the same pair resolves to the
    /// winner's room id.
    pub async fn create_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<RoomId, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let key = pair_key(user_a, user_b);
                let mut tx = pool.begin().await?;

                let inserted = sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO chat_rooms (is_public, pair_key)
                    VALUES (FALSE, $1)
                    ON CONFLICT (pair_key) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

                match inserted {
                    Some(room_id) => {
                        sqlx::query(
                            r#"
                            INSERT INTO room_participants (room_id, user_id)
                            VALUES ($1, $2), ($1, $3)
                            "#,
                        )
                        .bind(room_id)
                        .bind(user_a)
                        .bind(user_b)
                        .execute(&mut *tx)
                        .await?;
                        tx.commit().await?;
                        Ok(room_id)
                    }
                    None => {
                        // Lost the race; the conflicting insert has
                        // committed, so the winner is visible now.
                        drop(tx);
                        self.find_private_room(user_a, user_b)
                            .await?
                            .ok_or(EngineError::Storage(sqlx::Error::RowNotFound))
                    }
                }
            }
            Self::Memory(store) => {
                let mut guard = store.lock().await;
                let existing = guard
                    .rooms
                    .iter()
                    .find(|(_, room)| {
                        !room.is_public
                            && room.participants.contains(&user_a)
                            && room.participants.contains(&user_b)
                    })
                    .map(|(id, _)| *id);
                if let Some(room_id) = existing {
                    return Ok(room_id);
                }
                guard.next_room_id += 1;
                let room_id = guard.next_room_id;
                guard.rooms.insert(
                    room_id,
                    RoomRecord { is_public: false, participants: vec![user_a, user_b] },
                );
                Ok(room_id)
            }
        }
    }

    pub async fn is_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let exists = sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM room_participants
                        WHERE room_id = $1 AND user_id = $2
                    )
                    "#,
                )
                .bind(room_id)
                .bind(user_id)
                .fetch_one(pool)
                .await?;
                Ok(exists)
            }
            Self::Memory(store) => {
                let guard = store.lock().await;
                Ok(guard
                    .rooms
                    .get(&room_id)
                    .map(|room| room.participants.contains(&user_id))
                    .unwrap_or(false))
            }
        }
    }

    /// Persist a message, returning the generated id and timestamp.
    pub async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<(MessageId, DateTime<Utc>), EngineError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
                    r#"
                    INSERT INTO messages (room_id, sender_id, content)
                    VALUES ($1, $2, $3)
                    RETURNING id, created_at
                    "#,
                )
                .bind(room_id)
                .bind(sender_id)
                .bind(content)
                .fetch_one(pool)
                .await?;
                Ok(row)
            }
            Self::Memory(store) => {
                let mut guard = store.lock().await;
                if !guard.rooms.contains_key(&room_id) {
                    return Err(EngineError::Storage(sqlx::Error::RowNotFound));
                }
                guard.next_message_id += 1;
                let id = guard.next_message_id;
                let created_at = Utc::now();
                guard.messages.push(StoredMessage {
                    id,
                    room_id,
                    sender_id,
                    content: content.to_owned(),
                    created_at,
                });
                Ok((id, created_at))
            }
        }
    }

    pub async fn participants_of(&self, room_id: RoomId) -> Result<Vec<UserId>, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let participants = sqlx::query_scalar::<_, i64>(
                    "SELECT user_id FROM room_participants WHERE room_id = $1 ORDER BY user_id",
                )
                .bind(room_id)
                .fetch_all(pool)
                .await?;
                Ok(participants)
            }
            Self::Memory(store) => {
                let guard = store.lock().await;
                let mut participants = guard
                    .rooms
                    .get(&room_id)
                    .map(|room| room.participants.clone())
                    .unwrap_or_default();
                participants.sort_unstable();
                Ok(participants)
            }
        }
    }

    pub async fn lookup_username(&self, user_id: UserId) -> Result<Option<String>, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let username =
                    sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
                        .bind(user_id)
                        .fetch_optional(pool)
                        .await?;
                Ok(username)
            }
            Self::Memory(store) => Ok(store.lock().await.usernames.get(&user_id).cloned()),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(Mutex::new(MemoryRooms::default())))
    }

    #[cfg(test)]
    pub(crate) async fn add_user_for_tests(&self, user_id: UserId, username: &str) {
        if let Self::Memory(store) = self {
            store.lock().await.usernames.insert(user_id, username.to_owned());
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed_room_for_tests(
        &self,
        is_public: bool,
        participants: &[UserId],
    ) -> RoomId {
        match self {
            Self::Memory(store) => {
                let mut guard = store.lock().await;
                guard.next_room_id += 1;
                let room_id = guard.next_room_id;
                guard.rooms.insert(
                    room_id,
                    RoomRecord { is_public, participants: participants.to_vec() },
                );
                room_id
            }
            Self::Postgres(_) => unreachable!("tests use the memory store"),
        }
    }

    #[cfg(test)]
    pub(crate) async fn room_count_for_tests(&self) -> usize {
        match self {
            Self::Memory(store) => store.lock().await.rooms.len(),
            Self::Postgres(_) => unreachable!("tests use the memory store"),
        }
    }

    #[cfg(test)]
    pub(crate) async fn message_count_for_tests(&self, room_id: RoomId) -> usize {
        match self {
            Self::Memory(store) => store
                .lock()
                .await
                .messages
                .iter()
                .filter(|message| message.room_id == room_id)
                .count(),
            Self::Postgres(_) => unreachable!("tests use the memory store"),
        }
    }
}

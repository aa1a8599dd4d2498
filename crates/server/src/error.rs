use thiserror::Error;
use waypoint_common::protocol::ws::ServerMessage;
use waypoint_common::types::{RoomId, UserId};

/// Wire-level error code registry for the realtime protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthenticated,
    InvalidContent,
    NotAParticipant,
    NotOnline,
    UnknownUser,
    SelfChat,
    InvalidMessage,
    Storage,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::NotAParticipant => "NOT_A_PARTICIPANT",
            Self::NotOnline => "NOT_ONLINE",
            Self::UnknownUser => "UNKNOWN_USER",
            Self::SelfChat => "SELF_CHAT",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::Storage => "STORAGE",
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::Storage)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Unauthenticated => "session token did not resolve to a user",
            Self::InvalidContent => "message content failed validation",
            Self::NotAParticipant => "sender is not a participant of the room",
            Self::NotOnline => "user has no active connection",
            Self::UnknownUser => "target user does not exist",
            Self::SelfChat => "cannot open a private chat with yourself",
            Self::InvalidMessage => "frame could not be decoded",
            Self::Storage => "storage backend failure",
        }
    }
}

/// Failures surfaced by the presence/messaging engine.
///
/// Validation errors are reported only to the connection that triggered
/// the operation; storage errors are the only retryable class.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session token did not resolve to a user")]
    Unauthenticated,

    #[error("{0}")]
    InvalidContent(&'static str),

    #[error("sender is not a participant of room {0}")]
    NotAParticipant(RoomId),

    #[error("user {0} has no active connection")]
    NotOnline(UserId),

    #[error("user {0} does not exist")]
    UnknownUser(UserId),

    #[error("cannot open a private chat with yourself")]
    SelfChat,

    #[error("storage backend failure")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::InvalidContent(_) => ErrorCode::InvalidContent,
            Self::NotAParticipant(_) => ErrorCode::NotAParticipant,
            Self::NotOnline(_) => ErrorCode::NotOnline,
            Self::UnknownUser(_) => ErrorCode::UnknownUser,
            Self::SelfChat => ErrorCode::SelfChat,
            Self::Storage(_) => ErrorCode::Storage,
        }
    }

    /// Render this error as the structured frame sent to the initiator.
    ///
    /// Storage errors deliberately hide the backend detail; everything
    /// else carries its display message.
    pub fn to_ws(&self) -> ServerMessage {
        let code = self.code();
        let message = match self {
            Self::Storage(_) => code.default_message().to_owned(),
            other => other.to_string(),
        };
        ServerMessage::Error { code: code.as_str().to_owned(), message, retryable: code.retryable() }
    }
}

/// Build an error frame straight from a code, for failures that occur
/// before an [`EngineError`] exists (e.g. undecodable frames).
pub fn ws_error(code: ErrorCode) -> ServerMessage {
    ServerMessage::Error {
        code: code.as_str().to_owned(),
        message: code.default_message().to_owned(),
        retryable: code.retryable(),
    }
}

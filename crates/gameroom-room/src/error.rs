//! Error types for the room layer.

use gameroom_protocol::{ErrorCode, RoomId};
use gameroom_session::SessionId;

/// Errors that can occur during room and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The session is already a member of this room.
    #[error("session {0} already in room {1}")]
    AlreadyMember(SessionId, RoomId),

    /// The room has begun teardown and accepts no new members.
    #[error("room {0} is closed")]
    RoomClosed(RoomId),

    /// The room already holds `max_members` players.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// Only the room's owner may destroy it.
    #[error("only the owner can destroy room {0}")]
    NotOwner(RoomId),

    /// The registry is shutting down and creates no new rooms.
    #[error("room registry is shutting down")]
    ShuttingDown,

    /// No unused room code was found within the retry budget.
    #[error("no free room code after {0} attempts")]
    CapacityExhausted(u32),

    /// The room's actor is gone or its command channel is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

impl RoomError {
    /// The wire error code reported to clients for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyMember(..) => ErrorCode::AlreadyMember,
            Self::RoomClosed(_) | Self::ShuttingDown | Self::Unavailable(_) => {
                ErrorCode::RoomClosed
            }
            Self::CapacityExhausted(_) => ErrorCode::CapacityExhausted,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::NotOwner(_) => ErrorCode::NotOwner,
        }
    }
}

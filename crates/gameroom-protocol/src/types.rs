//! Wire types: identifiers and the control frames exchanged with clients.
//!
//! Every frame is a JSON object discriminated by a `type` tag. Tags are
//! snake_case and fields are camelCase so browser clients can use them
//! without renaming:
//!
//! ```text
//! → {"type":"join","roomId":"K7Q2ZD","playerName":"Bob"}
//! ← {"type":"joined","roomId":"K7Q2ZD","playerId":"9f1c0a77d2e4b310"}
//! ← {"type":"message","senderId":"03ab…","data":"hello"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A room code, e.g. `K7Q2ZD`.
///
/// Codes are case-insensitive for humans typing them in, so the stored
/// form is always upper case. Deserialization normalizes too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room ID, normalizing to upper case.
    pub fn new(code: impl Into<String>) -> Self {
        let mut code = code.into();
        code.make_ascii_uppercase();
        Self(code)
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomId {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player's identity, independent of the connection carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Client → server control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Create a new room owned by the sender, then join it.
    Create {
        #[serde(default)]
        player_name: Option<String>,
    },

    /// Join an existing room by code.
    Join {
        room_id: RoomId,
        #[serde(default)]
        player_name: Option<String>,
    },

    /// Leave the current room.
    Leave,

    /// Send `data` to every other member of the current room.
    Broadcast { data: Value },

    /// Tear down the current room. Only its owner may do this.
    Destroy,
}

impl ClientFrame {
    /// Checks rules the frame's shape cannot express.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] for a `join` whose room
    /// code is empty or contains anything but ASCII letters and digits.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Self::Join { room_id, .. } = self {
            let code = room_id.as_str();
            if code.is_empty() || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(ProtocolError::InvalidMessage(format!(
                    "invalid room code {code:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// A room was created on the client's behalf.
    RoomCreated { room_id: RoomId },

    /// The client is now a member of `room_id` as `player_id`.
    Joined { room_id: RoomId, player_id: PlayerId },

    /// The client left `room_id`.
    Left { room_id: RoomId },

    /// A request was rejected. Only the offending client receives this.
    Error { code: ErrorCode, message: String },

    /// Another player joined the room.
    MemberJoined {
        player_id: PlayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
    },

    /// Another player left the room (voluntarily, disconnected, or stalled).
    MemberLeft { player_id: PlayerId },

    /// A broadcast from another member.
    Message { sender_id: PlayerId, data: Value },

    /// The room's owner left and `player_id` took over.
    OwnerChanged { player_id: PlayerId },

    /// The room was torn down; the connection is about to close.
    RoomClosed,
}

impl ServerFrame {
    /// Shorthand for an [`ServerFrame::Error`] frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Machine-readable error codes carried by [`ServerFrame::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The room does not exist (or no longer exists).
    NotFound,
    /// The connection is already in a room.
    AlreadyMember,
    /// The room is shutting down.
    RoomClosed,
    /// No free room code could be found.
    CapacityExhausted,
    /// The frame could not be parsed.
    Malformed,
    /// The request needs a joined room.
    NotJoined,
    /// The room already holds its maximum number of members.
    RoomFull,
    /// Only the room's owner may do that.
    NotOwner,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::AlreadyMember => "already_member",
            Self::RoomClosed => "room_closed",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::Malformed => "malformed",
            Self::NotJoined => "not_joined",
            Self::RoomFull => "room_full",
            Self::NotOwner => "not_owner",
        };
        f.write_str(s)
    }
}

//! Players: the identity that rides on a room membership.
//!
//! A [`Player`] is deliberately separate from the
//! [`ConnectionSession`](crate::ConnectionSession) carrying it, so a future
//! reconnect can re-attach the same identity to a new connection.

use gameroom_protocol::PlayerId;
use rand::Rng;

/// Longest display name kept; longer names are truncated.
pub const MAX_NAME_LEN: usize = 32;

/// A player's identity and display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Stable identity shown to other members (`senderId`, `playerId`).
    pub id: PlayerId,
    /// Optional display name supplied by the client.
    pub name: Option<String>,
}

impl Player {
    /// Creates a player with a freshly generated ID.
    ///
    /// Blank names are treated as absent; names are trimmed and capped at
    /// [`MAX_NAME_LEN`] characters.
    pub fn new(name: Option<String>) -> Self {
        Self::with_id(generate_player_id(), name)
    }

    /// Creates a player with a known ID.
    pub fn with_id(id: PlayerId, name: Option<String>) -> Self {
        let name = name
            .map(|n| n.trim().chars().take(MAX_NAME_LEN).collect::<String>())
            .filter(|n| !n.is_empty());
        Self { id, name }
    }

    /// Returns the display name, falling back to the ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Generates a random 16-character lowercase hex player ID (64 bits).
///
/// Collisions are harmless to the core (membership is keyed by session),
/// they would only confuse clients, and 64 bits makes them negligible.
fn generate_player_id() -> PlayerId {
    let bytes: [u8; 8] = rand::rng().random();
    PlayerId(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

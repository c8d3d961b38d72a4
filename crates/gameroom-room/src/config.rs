//! Room configuration and lifecycle state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings shared by the registry and every room it creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// How many codes `create_room` tries before giving up with
    /// `CapacityExhausted`.
    pub max_id_attempts: u32,

    /// Bound of each room actor's command channel.
    pub command_capacity: usize,

    /// How long an emptied room lingers before teardown. Zero tears the
    /// room down as soon as its last member leaves.
    pub empty_grace: Duration,

    /// How long a freshly created room waits for its first member.
    pub unclaimed_timeout: Duration,

    /// Most members a room holds at once. Further joins get `RoomFull`.
    pub max_members: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_id_attempts: 32,
            command_capacity: 256,
            empty_grace: Duration::ZERO,
            unclaimed_timeout: Duration::from_secs(60),
            max_members: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Unclaimed ──join──► Active ◄──join── Empty
///     │                 │  └──last leave──►│
///     └────timeout──────┴──► Closed ◄──────┘
/// ```
///
/// - **Unclaimed**: created, nobody has joined yet.
/// - **Active**: at least one member.
/// - **Empty**: every member left; waiting out the grace period.
/// - **Closed**: torn down. Joins are rejected and the registry entry is
///   gone or about to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Unclaimed,
    Active,
    Empty,
    Closed,
}

impl RoomState {
    /// Returns `true` if the room accepts new members.
    pub fn is_joinable(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Closed, _) => false,
            (_, Self::Closed) => true,
            (Self::Unclaimed | Self::Empty, Self::Active) => true,
            (Self::Active, Self::Empty) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclaimed => write!(f, "Unclaimed"),
            Self::Active => write!(f, "Active"),
            Self::Empty => write!(f, "Empty"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_state_can_transition_to() {
        assert!(RoomState::Unclaimed.can_transition_to(RoomState::Active));
        assert!(RoomState::Active.can_transition_to(RoomState::Empty));
        assert!(RoomState::Empty.can_transition_to(RoomState::Active));
        assert!(RoomState::Unclaimed.can_transition_to(RoomState::Closed));
        assert!(!RoomState::Unclaimed.can_transition_to(RoomState::Empty));
        assert!(!RoomState::Closed.can_transition_to(RoomState::Active));
    }

    #[test]
    fn test_room_state_is_joinable() {
        assert!(RoomState::Unclaimed.is_joinable());
        assert!(RoomState::Active.is_joinable());
        assert!(RoomState::Empty.is_joinable());
        assert!(!RoomState::Closed.is_joinable());
    }

    #[test]
    fn test_room_state_display() {
        assert_eq!(RoomState::Unclaimed.to_string(), "Unclaimed");
        assert_eq!(RoomState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.max_id_attempts, 32);
        assert_eq!(config.command_capacity, 256);
        assert_eq!(config.empty_grace, Duration::ZERO);
        assert_eq!(config.unclaimed_timeout, Duration::from_secs(60));
        assert_eq!(config.max_members, 8);
    }
}

//! Rooms for gameroom.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! membership and fans broadcasts out to its members' sessions.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: allocates room codes, tracks live rooms, shuts
//!   them all down
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`RoomState`]: lifecycle state machine
//! - [`RoomConfig`]: code allocation and cleanup settings

mod config;
mod error;
mod id;
mod registry;
mod room;

pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use id::{ROOM_ID_ALPHABET, ROOM_ID_LEN, generate_room_id};
pub use registry::RoomRegistry;
pub use room::{RoomHandle, RoomInfo};

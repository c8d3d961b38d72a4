//! # gameroom
//!
//! A multiplayer room server. Clients connect over WebSocket, create a room
//! (getting back a short code like `K7Q2ZD`) or join one by code, and
//! broadcast JSON payloads to everyone else in the room.
//!
//! The layers live in their own crates and are re-exported here:
//!
//! - `gameroom-transport`: connections that carry whole messages
//! - `gameroom-protocol`: the JSON control frames and the codec
//! - `gameroom-session`: per-connection reader/writer tasks and queues
//! - `gameroom-room`: room actors and the registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gameroom::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GameroomError> {
//!     let server = GameroomServer::builder().bind("0.0.0.0:8080").build().await?;
//!     server.run_until(async { tokio::signal::ctrl_c().await.unwrap_or(()) }).await
//! }
//! ```

mod error;
mod handler;
mod server;

pub use error::GameroomError;
pub use server::{DEFAULT_ADDR, GameroomServer, GameroomServerBuilder};

pub use gameroom_protocol as protocol;
pub use gameroom_room as room;
pub use gameroom_session as session;
pub use gameroom_transport as transport;

/// The types most embedders need.
pub mod prelude {
    pub use crate::{GameroomError, GameroomServer, GameroomServerBuilder};
    pub use gameroom_protocol::{ClientFrame, ErrorCode, JsonCodec, PlayerId, RoomId, ServerFrame};
    pub use gameroom_room::{RoomConfig, RoomRegistry};
    pub use gameroom_session::SessionConfig;
    pub use gameroom_transport::{MemoryTransport, WebSocketTransport};
}

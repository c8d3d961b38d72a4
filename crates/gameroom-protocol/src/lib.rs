//! Wire protocol for gameroom.
//!
//! - **Types** ([`ClientFrame`], [`ServerFrame`], [`ErrorCode`],
//!   [`RoomId`], [`PlayerId`]): the frames that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames are converted
//!   to and from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong doing so.
//!
//! The protocol layer sits between transport (raw bytes) and the room core.
//! It knows nothing about connections or rooms.
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Dispatch loop (rooms)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{ClientFrame, ErrorCode, PlayerId, RoomId, ServerFrame};

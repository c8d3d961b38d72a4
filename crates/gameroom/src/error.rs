//! Unified error type for gameroom.

use gameroom_protocol::ProtocolError;
use gameroom_room::RoomError;
use gameroom_session::SessionError;
use gameroom_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Embedders using the `gameroom` crate deal with this single type; `?`
/// converts the sub-crate errors through the `#[from]` impls.
#[derive(Debug, thiserror::Error)]
pub enum GameroomError {
    /// Binding, accepting, or shutting down the listener failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session was already closed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room or registry operation was rejected.
    #[error(transparent)]
    Room(#[from] RoomError),
}

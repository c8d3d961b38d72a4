//! Error types for the session layer.

use crate::SessionId;

/// Errors that can occur while operating a connection session.
///
/// Most session failures are deliberately *not* errors: a send to a closed
/// or stalled session just reports `false`. These variants cover the
/// cases a caller has to react to.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has been closed; its transport is released.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// Encoding an outbound frame failed.
    #[error("failed to encode frame for session {0}: {1}")]
    Encode(SessionId, #[source] gameroom_protocol::ProtocolError),

    /// The transport reported an I/O failure.
    #[error("transport error on session {0}: {1}")]
    Transport(SessionId, String),
}

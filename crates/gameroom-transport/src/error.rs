use std::io;

/// Errors that can occur in the transport layer.
///
/// Only `Bind` stops a server from starting. The others end a single
/// connection or lose a single client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// The peer connected but the WebSocket upgrade did not complete.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// Writing a message failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Reading a message failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The connection is already closed on this side or the other.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The transport stopped producing connections.
    #[error("transport shut down")]
    Shutdown,
}

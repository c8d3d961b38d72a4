//! In-process transport backed by Tokio channels.
//!
//! [`MemoryTransport`] behaves like a listener: every
//! [`MemoryConnector::connect`] produces a server-side [`MemoryConnection`]
//! (returned from `accept`) and a client-side [`MemoryClient`] for the
//! caller. The client can inject a read failure to simulate a dropped
//! network link.

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Pending connections waiting in `accept`.
const ACCEPT_BACKLOG: usize = 64;

/// What the client pushes toward the server side.
#[derive(Debug)]
enum Inbound {
    Data(Vec<u8>),
    Fail(String),
}

/// A [`Transport`] whose connections are created in-process.
pub struct MemoryTransport {
    incoming: mpsc::Receiver<MemoryConnection>,
}

/// Opens new connections to a [`MemoryTransport`]. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    sender: mpsc::Sender<MemoryConnection>,
}

impl MemoryTransport {
    /// Creates a transport and the connector used to dial it.
    pub fn new() -> (Self, MemoryConnector) {
        let (sender, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        (Self { incoming }, MemoryConnector { sender })
    }
}

impl MemoryConnector {
    /// Opens a connection and returns the client end.
    ///
    /// # Errors
    /// Returns [`TransportError::Shutdown`] if the transport was dropped.
    pub async fn connect(&self) -> Result<MemoryClient, TransportError> {
        let (server, client) = MemoryConnection::pair();
        self.sender
            .send(server)
            .await
            .map_err(|_| TransportError::Shutdown)?;
        Ok(client)
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        match self.incoming.recv().await {
            Some(conn) => {
                tracing::debug!(id = %conn.id, "accepted in-memory connection");
                Ok(conn)
            }
            // Every connector is gone: nothing can arrive any more, so
            // behave like an idle listener instead of spinning on errors.
            None => std::future::pending().await,
        }
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MemoryConnection {
    /// Creates a connected server/client pair without going through a
    /// transport.
    pub fn pair() -> (MemoryConnection, MemoryClient) {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::unbounded_channel();
        let server = MemoryConnection {
            id: ConnectionId::next(),
            inbound: Mutex::new(inbound),
            outbound: Mutex::new(Some(outbound)),
        };
        let client = MemoryClient {
            to_server: Mutex::new(Some(to_server)),
            from_server,
        };
        (server, client)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outbound = self.outbound.lock().await;
        let sender = outbound
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        sender
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        match self.inbound.lock().await.recv().await {
            Some(Inbound::Data(data)) => Ok(Some(data)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, reason),
            )),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping the sender ends the client's `recv` stream.
        self.outbound.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Client side of an in-memory connection.
pub struct MemoryClient {
    to_server: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    from_server: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryClient {
    /// Sends one message to the server.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.push(Inbound::Data(data.into())).await
    }

    /// Makes the server's next `recv` fail with a receive error.
    pub async fn fail(&self, reason: &str) -> Result<(), TransportError> {
        self.push(Inbound::Fail(reason.to_string())).await
    }

    /// Receives the next message from the server, or `None` once the
    /// server closed the connection.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_server.recv().await
    }

    /// Returns a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_server.try_recv().ok()
    }

    /// Closes the client side; the server sees a clean end of stream.
    pub async fn close(&self) {
        self.to_server.lock().await.take();
    }

    async fn push(&self, msg: Inbound) -> Result<(), TransportError> {
        let to_server = self.to_server.lock().await;
        let sender = to_server
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        sender
            .send(msg)
            .map_err(|_| TransportError::ConnectionClosed("server dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_directions() {
        let (server, mut client) = MemoryConnection::pair();

        client.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(b"ping".to_vec()));

        server.send(b"pong").await.unwrap();
        assert_eq!(client.recv().await, Some(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces_as_receive_error() {
        let (server, client) = MemoryConnection::pair();
        client.fail("cable cut").await.unwrap();

        let err = server.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::ReceiveFailed(_)));
    }

    #[tokio::test]
    async fn test_client_close_is_clean_eof() {
        let (server, client) = MemoryConnection::pair();
        client.close().await;
        assert_eq!(server.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_close_ends_client_stream_and_rejects_send() {
        let (server, mut client) = MemoryConnection::pair();
        server.close().await.unwrap();

        assert_eq!(client.recv().await, None);
        assert!(matches!(
            server.send(b"late").await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_connector_feeds_accept() {
        let (mut transport, connector) = MemoryTransport::new();
        let client = connector.connect().await.unwrap();
        let server = transport.accept().await.unwrap();

        client.send("hi").await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn test_connect_after_transport_dropped_fails() {
        let (transport, connector) = MemoryTransport::new();
        drop(transport);
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Shutdown)
        ));
    }
}

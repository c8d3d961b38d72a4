//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// How long a TCP peer gets to complete the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgraded connections waiting for [`Transport::accept`].
const READY_BACKLOG: usize = 64;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// A background task accepts TCP connections and upgrades each one in its
/// own task, so a peer that stalls mid-handshake never holds up the
/// peers behind it. `accept` hands out connections in the order their
/// upgrades finish.
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<Result<WebSocketConnection, TransportError>>,
    acceptor: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with_timeout(addr, DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Like [`bind`](Self::bind), dropping peers that have not finished
    /// the upgrade within `handshake_timeout`.
    pub async fn bind_with_timeout(
        addr: &str,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let bind_error = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        tracing::info!(%local_addr, ?handshake_timeout, "WebSocket transport listening");

        let (ready_tx, ready) = mpsc::channel(READY_BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, ready_tx, handshake_timeout));
        Ok(Self {
            local_addr,
            ready,
            acceptor,
        })
    }

    /// Returns the address the listener is bound to.
    ///
    /// Useful after binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.ready.recv().await.unwrap_or(Err(TransportError::Shutdown))
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        tracing::info!("WebSocket transport shutting down");
        self.acceptor.abort();
        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

/// Accepts TCP connections until the transport goes away, spawning one
/// upgrade task per peer.
async fn accept_loop(
    listener: TcpListener,
    ready: mpsc::Sender<Result<WebSocketConnection, TransportError>>,
    handshake_timeout: Duration,
) {
    loop {
        let accepted = tokio::select! {
            () = ready.closed() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                if ready.send(Err(TransportError::AcceptFailed(e))).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let ready = ready.clone();
        tokio::spawn(async move {
            let upgraded = upgrade(stream, addr, handshake_timeout).await;
            // The transport is gone; dropping the connection closes it.
            let _ = ready.send(upgraded).await;
        });
    }
}

async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    handshake_timeout: Duration,
) -> Result<WebSocketConnection, TransportError> {
    let ws = match tokio::time::timeout(handshake_timeout, tokio_tungstenite::accept_async(stream))
        .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => return Err(TransportError::Handshake(format!("{addr}: {e}"))),
        Err(_) => {
            return Err(TransportError::Handshake(format!(
                "{addr}: timed out after {handshake_timeout:?}"
            )));
        }
    };

    let id = ConnectionId::next();
    tracing::debug!(%id, %addr, "accepted WebSocket connection");

    // Split so the reader task parked in `recv` never holds the lock
    // the writer task needs for `send`.
    let (sink, stream) = ws.split();
    Ok(WebSocketConnection {
        id,
        sink: Mutex::new(sink),
        stream: Mutex::new(stream),
    })
}

/// A single upgraded WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        // Browsers expect JSON as text frames; anything else goes binary.
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(data.to_vec()),
        };
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

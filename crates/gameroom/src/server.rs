//! `GameroomServer` builder and accept loop.
//!
//! This is the entry point for running a gameroom server. It ties together
//! all the layers: transport → session → dispatch → rooms.

use std::future::Future;
use std::sync::Arc;

use gameroom_protocol::{Codec, JsonCodec};
use gameroom_room::{RoomConfig, RoomRegistry};
use gameroom_session::SessionConfig;
use gameroom_transport::{Transport, TransportError, WebSocketTransport};

use crate::GameroomError;
use crate::handler::handle_connection;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<K> {
    pub(crate) registry: RoomRegistry,
    pub(crate) codec: K,
    pub(crate) session_config: SessionConfig,
}

/// Builder for configuring and starting a gameroom server.
///
/// # Example
///
/// ```rust,no_run
/// use gameroom::prelude::*;
///
/// # async fn serve() -> Result<(), GameroomError> {
/// let server = GameroomServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct GameroomServerBuilder<K = JsonCodec> {
    bind_addr: String,
    session_config: SessionConfig,
    room_config: RoomConfig,
    codec: K,
}

impl GameroomServerBuilder {
    /// Creates a new builder with default settings and the JSON codec.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            session_config: SessionConfig::default(),
            room_config: RoomConfig::default(),
            codec: JsonCodec,
        }
    }
}

impl<K: Codec + Clone> GameroomServerBuilder<K> {
    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the per-connection session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the configuration shared by every room.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.room_config = config;
        self
    }

    /// Replaces the wire codec.
    pub fn codec<K2: Codec + Clone>(self, codec: K2) -> GameroomServerBuilder<K2> {
        GameroomServerBuilder {
            bind_addr: self.bind_addr,
            session_config: self.session_config,
            room_config: self.room_config,
            codec,
        }
    }

    /// Binds a WebSocket listener and builds the server.
    ///
    /// # Errors
    /// Returns a transport error if the address cannot be bound.
    pub async fn build(self) -> Result<GameroomServer<WebSocketTransport, K>, GameroomError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        Ok(self.build_with(transport))
    }

    /// Builds the server on top of an already constructed transport, such
    /// as a [`MemoryTransport`](gameroom_transport::MemoryTransport).
    pub fn build_with<T>(self, transport: T) -> GameroomServer<T, K>
    where
        T: Transport<Error = TransportError>,
    {
        let state = Arc::new(ServerState {
            registry: RoomRegistry::new(self.room_config),
            codec: self.codec,
            session_config: self.session_config,
        });
        GameroomServer { transport, state }
    }
}

impl Default for GameroomServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A gameroom server bound to a transport.
///
/// Call [`run`](Self::run) or [`run_until`](Self::run_until) to start
/// accepting connections.
pub struct GameroomServer<T, K = JsonCodec> {
    transport: T,
    state: Arc<ServerState<K>>,
}

impl GameroomServer<WebSocketTransport> {
    /// Creates a new builder.
    pub fn builder() -> GameroomServerBuilder {
        GameroomServerBuilder::new()
    }
}

impl<K> GameroomServer<WebSocketTransport, K> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.transport.local_addr()
    }
}

impl<T, K> GameroomServer<T, K>
where
    T: Transport<Error = TransportError>,
    K: Codec + Clone,
{
    /// The registry holding this server's rooms.
    pub fn registry(&self) -> &RoomRegistry {
        &self.state.registry
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), GameroomError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// room (members receive `room_closed`) and shuts the transport down.
    ///
    /// A failed accept (for example a client that botched the WebSocket
    /// handshake) is logged and does not stop the loop.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), GameroomError> {
        tracing::info!("gameroom server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(handle_connection(conn, Arc::clone(&self.state)));
                    }
                    Err(TransportError::Shutdown) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!(rooms = self.state.registry.len(), "gameroom server shutting down");
        self.state.registry.shutdown().await;
        self.transport.shutdown().await?;
        Ok(())
    }
}

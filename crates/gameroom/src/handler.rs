//! Per-connection dispatch loop.
//!
//! Each accepted connection gets its own Tokio task running this loop on
//! top of a [`ConnectionSession`]. The loop is a small state machine:
//!
//! ```text
//!            create / join ok
//! Unjoined ───────────────────► Joined
//!    ▲                            │
//!    └──────────── leave ─────────┘
//!
//! transport EOF/error or session closed ──► Terminated (from any state)
//! ```
//!
//! Rejected requests get an `error` frame and leave the state unchanged.

use std::sync::Arc;

use gameroom_protocol::{ClientFrame, Codec, ErrorCode, PlayerId, RoomId, ServerFrame};
use gameroom_room::{RoomError, RoomHandle, RoomRegistry};
use gameroom_session::{ConnectionSession, Player, SessionError, SessionInbound};
use gameroom_transport::Connection;
use serde_json::Value;

use crate::server::ServerState;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, K>(conn: C, state: Arc<ServerState<K>>)
where
    C: Connection,
    K: Codec + Clone,
{
    let conn_id = conn.id();
    let (session, inbound) = ConnectionSession::spawn(conn, state.codec.clone(), &state.session_config);
    let player_id = Player::new(None).id;
    tracing::info!(%conn_id, session_id = %session.id(), %player_id, "connection opened");

    let dispatcher = Dispatcher {
        session,
        registry: state.registry.clone(),
        codec: state.codec.clone(),
        player_id,
        room: None,
    };
    dispatcher.run(inbound).await;
}

struct Dispatcher<K> {
    session: ConnectionSession,
    registry: RoomRegistry,
    codec: K,
    /// Stable for the life of the connection, across rooms.
    player_id: PlayerId,
    /// `Some` while Joined.
    room: Option<RoomHandle>,
}

impl<K: Codec> Dispatcher<K> {
    async fn run(mut self, mut inbound: SessionInbound) {
        while let Some(bytes) = inbound.recv().await {
            self.sync_membership();

            let decoded = self
                .codec
                .decode::<ClientFrame>(&bytes)
                .and_then(|frame| frame.validate().map(|()| frame));
            let result = match decoded {
                Ok(frame) => self.handle(frame).await,
                Err(e) => {
                    tracing::debug!(session_id = %self.session.id(), error = %e, "malformed frame");
                    self.reject(ErrorCode::Malformed, e.to_string()).await
                }
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "dispatch stopped");
                break;
            }
        }

        self.terminate().await;
    }

    async fn handle(&mut self, frame: ClientFrame) -> Result<(), SessionError> {
        match frame {
            ClientFrame::Create { player_name } => self.create(player_name).await,
            ClientFrame::Join {
                room_id,
                player_name,
            } => self.join(room_id, player_name).await,
            ClientFrame::Leave => self.leave().await,
            ClientFrame::Broadcast { data } => self.broadcast(data).await,
            ClientFrame::Destroy => self.destroy().await,
        }
    }

    async fn create(&mut self, player_name: Option<String>) -> Result<(), SessionError> {
        if let Some(room) = &self.room {
            let message = format!("already in room {}", room.room_id());
            return self.reject(ErrorCode::AlreadyMember, message).await;
        }

        let room_id = match self.registry.create_room(self.player_id.clone()) {
            Ok(room_id) => room_id,
            Err(e) => return self.reject_room(e).await,
        };

        let created = ServerFrame::RoomCreated {
            room_id: room_id.clone(),
        };
        let result = match self.session.reply(created).await {
            Ok(()) => self.join(room_id.clone(), player_name).await,
            Err(e) => Err(e),
        };
        if self.room.is_none() {
            // Nobody else has seen the code yet, so nobody will claim it.
            if let Some(room) = self.registry.get_room(&room_id) {
                tracing::debug!(%room_id, "creator never joined, closing room");
                room.close().await;
            }
        }
        result
    }

    async fn join(
        &mut self,
        room_id: RoomId,
        player_name: Option<String>,
    ) -> Result<(), SessionError> {
        if let Some(room) = &self.room {
            let message = format!("already in room {}", room.room_id());
            return self.reject(ErrorCode::AlreadyMember, message).await;
        }

        let Some(room) = self.registry.get_room(&room_id) else {
            return self.reject_room(RoomError::NotFound(room_id)).await;
        };

        let player = Player::with_id(self.player_id.clone(), player_name);
        match room.join(self.session.clone(), player).await {
            // The room has already queued `joined` for us.
            Ok(()) => {
                self.room = Some(room);
                Ok(())
            }
            Err(e) => self.reject_room(e).await,
        }
    }

    async fn leave(&mut self) -> Result<(), SessionError> {
        let Some(room) = self.room.take() else {
            return self.reject(ErrorCode::NotJoined, "not in a room").await;
        };
        room.leave(self.session.id()).await;
        self.session
            .reply(ServerFrame::Left {
                room_id: room.room_id().clone(),
            })
            .await
    }

    async fn broadcast(&mut self, data: Value) -> Result<(), SessionError> {
        let Some(room) = &self.room else {
            return self.reject(ErrorCode::NotJoined, "not in a room").await;
        };
        let result = room.broadcast(self.session.id(), data).await;
        if let Err(e) = result {
            self.room = None;
            return self.reject_room(e).await;
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), SessionError> {
        let Some(room) = &self.room else {
            return self.reject(ErrorCode::NotJoined, "not in a room").await;
        };
        let result = room.destroy(self.session.id()).await;
        match result {
            // The room has sent us `room_closed` and is closing the session.
            Ok(()) => {
                self.room = None;
                Ok(())
            }
            Err(e) => self.reject_room(e).await,
        }
    }

    /// Drops the room handle if the room let go of this session on its own
    /// (eviction or teardown).
    fn sync_membership(&mut self) {
        if self.room.is_some() && self.session.room().is_none() {
            tracing::debug!(session_id = %self.session.id(), "no longer a member, back to unjoined");
            self.room = None;
        }
    }

    async fn reject_room(&self, err: RoomError) -> Result<(), SessionError> {
        self.reject(err.code(), err.to_string()).await
    }

    async fn reject(&self, code: ErrorCode, message: impl Into<String>) -> Result<(), SessionError> {
        let message = message.into();
        tracing::debug!(session_id = %self.session.id(), %code, %message, "request rejected");
        self.session.reply(ServerFrame::error(code, message)).await
    }

    async fn terminate(mut self) {
        if let Some(room) = self.room.take() {
            room.leave(self.session.id()).await;
        }
        self.session.close();
        tracing::info!(session_id = %self.session.id(), player_id = %self.player_id, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gameroom_protocol::JsonCodec;
    use gameroom_room::RoomConfig;
    use gameroom_session::SessionConfig;
    use gameroom_transport::{MemoryClient, MemoryConnection};
    use serde_json::json;

    fn state() -> Arc<ServerState<JsonCodec>> {
        Arc::new(ServerState {
            registry: RoomRegistry::new(RoomConfig::default()),
            codec: JsonCodec,
            session_config: SessionConfig::default(),
        })
    }

    fn connect(state: &Arc<ServerState<JsonCodec>>) -> MemoryClient {
        let (conn, client) = MemoryConnection::pair();
        tokio::spawn(handle_connection(conn, Arc::clone(state)));
        client
    }

    async fn next_frame(client: &mut MemoryClient) -> serde_json::Value {
        let bytes = client.recv().await.expect("connection should be open");
        serde_json::from_slice(&bytes).expect("server frames are JSON")
    }

    #[tokio::test]
    async fn test_malformed_frame_is_rejected_and_connection_stays_open() {
        let state = state();
        let mut client = connect(&state);

        client.send("not json").await.unwrap();
        let frame = next_frame(&mut client).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "malformed");

        client.send(r#"{"type":"create"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["type"], "room_created");
    }

    #[tokio::test]
    async fn test_join_with_invalid_code_is_malformed() {
        let state = state();
        let mut client = connect(&state);

        client.send(r#"{"type":"join","roomId":""}"#).await.unwrap();
        let frame = next_frame(&mut client).await;
        assert_eq!(frame["code"], "malformed");
        assert!(frame["message"].as_str().unwrap().contains("invalid room code"));
    }

    #[tokio::test]
    async fn test_broadcast_before_join_is_not_joined() {
        let state = state();
        let mut client = connect(&state);

        client.send(r#"{"type":"broadcast","data":1}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "not_joined");

        client.send(r#"{"type":"leave"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "not_joined");
    }

    #[tokio::test]
    async fn test_create_replies_room_created_then_joined() {
        let state = state();
        let mut client = connect(&state);

        client.send(r#"{"type":"create","playerName":"Ann"}"#).await.unwrap();
        let created = next_frame(&mut client).await;
        let joined = next_frame(&mut client).await;

        assert_eq!(created["type"], "room_created");
        assert_eq!(joined["type"], "joined");
        assert_eq!(created["roomId"], joined["roomId"]);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_join_while_joined_is_already_member() {
        let state = state();
        let mut client = connect(&state);
        client.send(r#"{"type":"create"}"#).await.unwrap();
        let room_id = next_frame(&mut client).await["roomId"].clone();
        next_frame(&mut client).await;

        let join = json!({"type": "join", "roomId": room_id});
        client.send(join.to_string()).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "already_member");

        client.send(r#"{"type":"create"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "already_member");
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_replies_left_and_allows_rejoin_elsewhere() {
        let state = state();
        let mut client = connect(&state);
        client.send(r#"{"type":"create"}"#).await.unwrap();
        let room_id = next_frame(&mut client).await["roomId"].clone();
        next_frame(&mut client).await;

        client.send(r#"{"type":"leave"}"#).await.unwrap();
        let left = next_frame(&mut client).await;
        assert_eq!(left, json!({"type": "left", "roomId": room_id}));
        assert!(state.registry.is_empty(), "sole member left, room is gone");

        client.send(r#"{"type":"create"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["type"], "room_created");
    }

    #[tokio::test]
    async fn test_create_that_cannot_join_closes_the_room() {
        let state = Arc::new(ServerState {
            registry: RoomRegistry::new(RoomConfig {
                max_members: 0,
                ..RoomConfig::default()
            }),
            codec: JsonCodec,
            session_config: SessionConfig::default(),
        });
        let mut client = connect(&state);

        client.send(r#"{"type":"create"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["type"], "room_created");
        assert_eq!(next_frame(&mut client).await["code"], "room_full");

        // A follow-up request proves the dispatcher finished the create.
        client.send(r#"{"type":"leave"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "not_joined");
        assert!(state.registry.is_empty(), "room was not left to time out");
    }

    #[tokio::test]
    async fn test_destroy_requires_a_room() {
        let state = state();
        let mut client = connect(&state);

        client.send(r#"{"type":"destroy"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["code"], "not_joined");
    }

    #[tokio::test]
    async fn test_owner_destroy_closes_room_and_connection() {
        let state = state();
        let mut client = connect(&state);
        client.send(r#"{"type":"create"}"#).await.unwrap();
        next_frame(&mut client).await;
        next_frame(&mut client).await;

        client.send(r#"{"type":"destroy"}"#).await.unwrap();
        assert_eq!(next_frame(&mut client).await["type"], "room_closed");
        assert!(client.recv().await.is_none(), "connection closes after room_closed");
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_player_id_is_stable_across_rooms() {
        let state = state();
        let mut client = connect(&state);

        client.send(r#"{"type":"create"}"#).await.unwrap();
        next_frame(&mut client).await;
        let first = next_frame(&mut client).await["playerId"].clone();
        client.send(r#"{"type":"leave"}"#).await.unwrap();
        next_frame(&mut client).await;
        client.send(r#"{"type":"create"}"#).await.unwrap();
        next_frame(&mut client).await;
        let second = next_frame(&mut client).await["playerId"].clone();

        assert_eq!(first, second);
    }
}

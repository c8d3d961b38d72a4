//! End-to-end tests for the server: accept loop, dispatch, rooms, and
//! shutdown, over the in-memory transport and over real WebSockets.

use std::time::Duration;

use gameroom::prelude::*;
use gameroom::transport::{MemoryClient, MemoryConnector};
use serde_json::{Value, json};
use tokio::sync::oneshot;

const STEP: Duration = Duration::from_secs(5);

// =========================================================================
// In-memory harness
// =========================================================================

struct Harness {
    connector: MemoryConnector,
    registry: RoomRegistry,
    stop: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<Result<(), GameroomError>>,
}

fn start() -> Harness {
    start_with(RoomConfig::default())
}

fn start_with(room_config: RoomConfig) -> Harness {
    let (transport, connector) = MemoryTransport::new();
    let server = GameroomServer::builder()
        .room_config(room_config)
        .build_with(transport);
    let registry = server.registry().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));
    Harness {
        connector,
        registry,
        stop,
        server,
    }
}

async fn recv_json(client: &mut MemoryClient) -> Value {
    let bytes = tokio::time::timeout(STEP, client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed unexpectedly");
    serde_json::from_slice(&bytes).expect("server frames are JSON")
}

async fn send_json(client: &MemoryClient, value: Value) {
    client.send(value.to_string()).await.expect("send should succeed");
}

/// Connects, creates a room, and returns (client, room code, player id).
async fn create_room(h: &Harness, name: &str) -> (MemoryClient, Value, Value) {
    let mut client = h.connector.connect().await.unwrap();
    send_json(&client, json!({"type": "create", "playerName": name})).await;
    let created = recv_json(&mut client).await;
    assert_eq!(created["type"], "room_created");
    let joined = recv_json(&mut client).await;
    assert_eq!(joined["type"], "joined");
    (client, created["roomId"].clone(), joined["playerId"].clone())
}

/// Connects and joins `room_id`; returns (client, player id).
async fn join_room(h: &Harness, room_id: &Value, name: &str) -> (MemoryClient, Value) {
    let mut client = h.connector.connect().await.unwrap();
    send_json(
        &client,
        json!({"type": "join", "roomId": room_id, "playerName": name}),
    )
    .await;
    let joined = recv_json(&mut client).await;
    assert_eq!(joined["type"], "joined", "unexpected reply: {joined}");
    assert_eq!(&joined["roomId"], room_id);
    (client, joined["playerId"].clone())
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_owner_broadcast_reaches_guest_but_not_owner() {
    let h = start();
    let (mut owner, room_id, owner_id) = create_room(&h, "Owner").await;
    let (mut bob, bob_id) = join_room(&h, &room_id, "Bob").await;

    assert_eq!(
        recv_json(&mut owner).await,
        json!({"type": "member_joined", "playerId": bob_id, "playerName": "Bob"})
    );

    send_json(&owner, json!({"type": "broadcast", "data": "hello"})).await;
    assert_eq!(
        recv_json(&mut bob).await,
        json!({"type": "message", "senderId": owner_id, "data": "hello"})
    );

    // Bob answers only after seeing "hello", so if the owner had been sent
    // its own broadcast it would arrive first.
    send_json(&bob, json!({"type": "broadcast", "data": "hi back"})).await;
    assert_eq!(
        recv_json(&mut owner).await,
        json!({"type": "message", "senderId": bob_id, "data": "hi back"})
    );
    assert!(owner.try_recv().is_none());
}

#[tokio::test]
async fn test_join_unknown_room_is_not_found() {
    let h = start();
    let (_owner, _room_id, _) = create_room(&h, "Owner").await;
    let mut stray = h.connector.connect().await.unwrap();

    send_json(&stray, json!({"type": "join", "roomId": "ZZZZZZ"})).await;
    let reply = recv_json(&mut stray).await;

    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "not_found");
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn test_room_codes_are_case_insensitive() {
    let h = start();
    let (_owner, room_id, _) = create_room(&h, "Owner").await;
    let lower = json!(room_id.as_str().unwrap().to_lowercase());

    let mut guest = h.connector.connect().await.unwrap();
    send_json(&guest, json!({"type": "join", "roomId": lower})).await;
    let joined = recv_json(&mut guest).await;

    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["roomId"], room_id);
}

#[tokio::test]
async fn test_transport_error_removes_member_and_notifies_others() {
    let h = start();
    let (mut owner, room_id, _) = create_room(&h, "Owner").await;
    let (mut bob, bob_id) = join_room(&h, &room_id, "Bob").await;
    recv_json(&mut owner).await; // member_joined

    bob.fail("connection reset").await.unwrap();

    assert_eq!(
        recv_json(&mut owner).await,
        json!({"type": "member_left", "playerId": bob_id})
    );
    let room = h
        .registry
        .get_room(&RoomId::new(room_id.as_str().unwrap()))
        .expect("room still has its owner");
    assert_eq!(room.info().await.unwrap().members.len(), 1);

    // Bob's side is closed once the session winds down.
    let end = tokio::time::timeout(STEP, bob.recv()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_last_member_disconnect_removes_room() {
    let h = start();
    let (owner, room_id, _) = create_room(&h, "Owner").await;
    let code = RoomId::new(room_id.as_str().unwrap());

    owner.close().await;

    tokio::time::timeout(STEP, async {
        while h.registry.get_room(&code).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("room should be removed once empty");
}

#[tokio::test]
async fn test_broadcast_order_is_preserved_per_sender() {
    let h = start();
    let (owner, room_id, _) = create_room(&h, "Owner").await;
    let (mut bob, _) = join_room(&h, &room_id, "Bob").await;

    for n in 0..40 {
        send_json(&owner, json!({"type": "broadcast", "data": n})).await;
    }

    for n in 0..40 {
        let frame = recv_json(&mut bob).await;
        assert_eq!(frame["data"], json!(n));
    }
}

#[tokio::test]
async fn test_shutdown_sends_room_closed_to_every_member() {
    let h = start();
    let (mut owner, room_id, _) = create_room(&h, "Owner").await;
    let (mut bob, _) = join_room(&h, &room_id, "Bob").await;
    recv_json(&mut owner).await; // member_joined

    h.stop.send(()).unwrap();
    h.server.await.unwrap().unwrap();

    for client in [&mut owner, &mut bob] {
        assert_eq!(recv_json(client).await, json!({"type": "room_closed"}));
        let end = tokio::time::timeout(STEP, client.recv()).await.unwrap();
        assert!(end.is_none(), "connection should close after room_closed");
    }
    assert!(h.registry.is_empty());
    assert!(h.registry.is_shutting_down());
}

#[tokio::test]
async fn test_full_room_rejects_join() {
    let h = start_with(RoomConfig {
        max_members: 2,
        ..RoomConfig::default()
    });
    let (_owner, room_id, _) = create_room(&h, "Owner").await;
    let (_bob, _) = join_room(&h, &room_id, "Bob").await;

    let mut carol = h.connector.connect().await.unwrap();
    send_json(&carol, json!({"type": "join", "roomId": room_id})).await;
    let reply = recv_json(&mut carol).await;

    assert_eq!(reply["code"], "room_full");
    assert_eq!(reply["message"], format!("room {} is full", room_id.as_str().unwrap()));
}

#[tokio::test]
async fn test_owner_leaving_hands_room_to_next_member() {
    let h = start();
    let (owner, room_id, owner_id) = create_room(&h, "Owner").await;
    let (mut bob, bob_id) = join_room(&h, &room_id, "Bob").await;
    let (mut carol, _) = join_room(&h, &room_id, "Carol").await;
    recv_json(&mut bob).await; // member_joined (Carol)

    send_json(&bob, json!({"type": "destroy"})).await;
    assert_eq!(recv_json(&mut bob).await["code"], "not_owner");

    owner.close().await;
    for client in [&mut bob, &mut carol] {
        assert_eq!(
            recv_json(client).await,
            json!({"type": "member_left", "playerId": owner_id})
        );
        assert_eq!(
            recv_json(client).await,
            json!({"type": "owner_changed", "playerId": bob_id})
        );
    }

    send_json(&bob, json!({"type": "destroy"})).await;
    for client in [&mut bob, &mut carol] {
        assert_eq!(recv_json(client).await, json!({"type": "room_closed"}));
        let end = tokio::time::timeout(STEP, client.recv()).await.unwrap();
        assert!(end.is_none(), "destroy disconnects every member");
    }
    assert!(h.registry.is_empty());
}

// =========================================================================
// WebSocket
// =========================================================================

mod websocket {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn send(ws: &mut ClientWs, value: Value) {
        ws.send(Message::text(value.to_string())).await.unwrap();
    }

    async fn recv(ws: &mut ClientWs) -> Value {
        loop {
            let msg = tokio::time::timeout(STEP, ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_create_join_broadcast_and_shutdown() {
        let server = GameroomServer::builder()
            .bind("127.0.0.1:0")
            .build()
            .await
            .expect("should bind");
        let url = format!("ws://{}", server.local_addr());
        let (stop, stopped) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        let (mut alice, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut alice, json!({"type": "create", "playerName": "Alice"})).await;
        let created = recv(&mut alice).await;
        assert_eq!(created["type"], "room_created");
        let room_id = created["roomId"].clone();
        let alice_id = recv(&mut alice).await["playerId"].clone();

        let (mut bob, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut bob, json!({"type": "join", "roomId": room_id})).await;
        assert_eq!(recv(&mut bob).await["type"], "joined");
        assert_eq!(recv(&mut alice).await["type"], "member_joined");

        send(&mut alice, json!({"type": "broadcast", "data": {"x": 3}})).await;
        assert_eq!(
            recv(&mut bob).await,
            json!({"type": "message", "senderId": alice_id, "data": {"x": 3}})
        );

        stop.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(recv(&mut alice).await, json!({"type": "room_closed"}));
        assert_eq!(recv(&mut bob).await, json!({"type": "room_closed"}));
    }
}

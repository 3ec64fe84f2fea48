use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use poker_collab::db::{AuthorityStore, InMemoryAuthorityStore, NewRoom};
use poker_collab::{AllFeaturesEnabled, AllowAllPermissions, Collab, InMemoryBlobStore, InMemoryTokenValidator, PokerContext};
use poker_core::{RoomConfig, RoomId, RoomPrivacy, RuntimeConfig, UserId};
use poker_impls::InMemoryBus;
use poker_server::{app, ServerContext};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Boots the full axum app on an ephemeral local port against in-memory
/// infrastructure doubles, and pre-creates one room owned by `owner`.
/// Returns the listen address, the room id, and the token validator used so
/// tests can register bearer tokens for participants.
async fn spawn_server(owner: Option<UserId>) -> (String, RoomId, Arc<InMemoryTokenValidator>) {
    let validator = Arc::new(InMemoryTokenValidator::new());

    let context = PokerContext {
        store: Arc::new(InMemoryAuthorityStore::new()),
        bus: Arc::new(InMemoryBus::new()),
        token_validator: validator.clone(),
        blob_store: Arc::new(InMemoryBlobStore::new()),
        permissions: Arc::new(AllowAllPermissions),
        feature_gate: Arc::new(AllFeaturesEnabled),
    };

    let room = context
        .store
        .create_room(NewRoom {
            title: "Sprint planning".to_string(),
            privacy: RoomPrivacy::Public,
            owner_user_id: owner,
            org_id: None,
            config: RoomConfig::default(),
        })
        .await
        .unwrap();

    let collab = Collab::new(context);

    let mut runtime_config = RuntimeConfig::default();
    runtime_config.join_timeout = Duration::from_millis(300);
    runtime_config.domain_operation_timeout = Duration::from_secs(2);

    let server_context = ServerContext {
        collab: Arc::new(collab),
        runtime_config: Arc::new(runtime_config),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app(server_context).into_make_service()).await.unwrap();
    });

    (format!("127.0.0.1:{}", addr.port()), room.id, validator)
}

async fn connect(addr: &str, room_id: &RoomId, token: &str) -> Socket {
    let url = format!("ws://{addr}/ws/room/{room_id}?token={token}");
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn send_json(socket: &mut Socket, value: serde_json::Value) {
    socket.send(WsMessage::Text(value.to_string())).await.unwrap();
}

async fn next_json(socket: &mut Socket) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("frame arrives before the test timeout")
        .expect("socket is not closed")
        .unwrap();
    serde_json::from_str(&msg.into_text().unwrap()).unwrap()
}

async fn join(socket: &mut Socket, display_name: &str) -> serde_json::Value {
    send_json(
        socket,
        serde_json::json!({
            "type": "room.join.v1",
            "requestId": "join-1",
            "payload": { "displayName": display_name },
        }),
    )
    .await;

    let joined = next_json(socket).await;
    assert_eq!(joined["type"], "room.participant_joined.v1");
    joined
}

#[tokio::test]
async fn host_starts_round_and_two_voters_reveal_into_consensus() {
    let owner = UserId::new();
    let (addr, room_id, validator) = spawn_server(Some(owner)).await;
    validator.register("host-token", owner);

    let mut host = connect(&addr, &room_id, "host-token").await;
    join(&mut host, "Hoster").await;

    let mut voter = connect(&addr, &room_id, "").await;
    join(&mut voter, "Voter One").await;

    // The host's socket also observes the voter's join fan-out.
    let voter_joined_on_host = next_json(&mut host).await;
    assert_eq!(voter_joined_on_host["type"], "room.participant_joined.v1");

    send_json(
        &mut host,
        serde_json::json!({
            "type": "round.start.v1",
            "requestId": "start-1",
            "payload": { "storyTitle": "As a user I can vote" },
        }),
    )
    .await;

    let started_on_host = next_json(&mut host).await;
    assert_eq!(started_on_host["type"], "round.started.v1");
    let started_on_voter = next_json(&mut voter).await;
    assert_eq!(started_on_voter["type"], "round.started.v1");

    send_json(
        &mut host,
        serde_json::json!({ "type": "vote.cast.v1", "requestId": "v1", "payload": { "cardValue": "5" } }),
    )
    .await;
    let _host_vote_echo = next_json(&mut host).await;
    let _host_vote_echo_on_voter = next_json(&mut voter).await;

    send_json(
        &mut voter,
        serde_json::json!({ "type": "vote.cast.v1", "requestId": "v2", "payload": { "cardValue": "5" } }),
    )
    .await;
    let _voter_vote_echo = next_json(&mut voter).await;
    let _voter_vote_echo_on_host = next_json(&mut host).await;

    send_json(
        &mut host,
        serde_json::json!({ "type": "round.reveal.v1", "requestId": "reveal-1", "payload": {} }),
    )
    .await;

    let revealed = next_json(&mut host).await;
    assert_eq!(revealed["type"], "round.revealed.v1");
    assert_eq!(revealed["payload"]["stats"]["consensus"], true);
    assert_eq!(revealed["payload"]["votes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn non_host_cannot_start_a_round() {
    let (addr, room_id, _validator) = spawn_server(None).await;

    let mut voter = connect(&addr, &room_id, "").await;
    join(&mut voter, "Just Voting").await;

    send_json(
        &mut voter,
        serde_json::json!({
            "type": "round.start.v1",
            "requestId": "start-1",
            "payload": {},
        }),
    )
    .await;

    let response = next_json(&mut voter).await;
    assert_eq!(response["type"], "error.v1");
    assert_eq!(response["payload"]["code"], 4003);
    assert_eq!(response["payload"]["error"], "FORBIDDEN");
}

#[tokio::test]
async fn join_timeout_closes_the_socket_without_a_join_frame() {
    let (addr, room_id, _validator) = spawn_server(None).await;

    let mut socket = connect(&addr, &room_id, "").await;

    let msg = tokio::time::timeout(Duration::from_secs(1), socket.next())
        .await
        .expect("server closes before the test timeout")
        .expect("a close frame arrives");

    match msg.unwrap() {
        WsMessage::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4400),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_bearer_token_is_rejected_before_upgrade() {
    let (addr, room_id, _validator) = spawn_server(None).await;

    let url = format!("ws://{addr}/ws/room/{room_id}?token=does-not-exist");
    let err = connect_async(url).await.unwrap_err();

    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use poker_collab::{Collab, Room, RoomConnection, RoomError};
use poker_core::{ParticipantIdentity, ParticipantRole, RoomEvent, RoomId, RuntimeConfig};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::auth::{resolve_token, TokenOutcome};
use crate::errors::{close_code, code, room_error_to_wire};
use crate::protocol::{
    error_frame, heartbeat_ping_frame, InboundFrame, JoinPayload, OutboundFrame, RoundStartPayload,
    VoteCastPayload,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}

pub async fn ws_upgrade(
    State(collab): State<Arc<Collab>>,
    State(runtime_config): State<Arc<RuntimeConfig>>,
    Path(room_id_raw): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(room_id) = RoomId::parse(&room_id_raw) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let identity_token = match resolve_token(&collab.context, &query.token).await {
        TokenOutcome::Anonymous => None,
        TokenOutcome::User(user_id) => Some(user_id),
        TokenOutcome::Invalid => return StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, collab, runtime_config, room_id, identity_token))
}

async fn handle_socket(
    socket: WebSocket,
    collab: Arc<Collab>,
    runtime_config: Arc<RuntimeConfig>,
    room_id: RoomId,
    user_id: Option<poker_core::UserId>,
) {
    let (mut sink, mut stream) = socket.split();

    let joined = match timeout(runtime_config.join_timeout, await_join(&mut stream)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            close_with(&mut sink, close_code::UNAUTHENTICATED, "connection closed before join").await;
            return;
        }
        Err(_) => {
            close_with(&mut sink, close_code::JOIN_TIMEOUT, "no room.join.v1 within the timeout").await;
            return;
        }
    };

    let join_payload: JoinPayload = match serde_json::from_value(joined.payload) {
        Ok(p) => p,
        Err(e) => {
            let frame = error_frame(&joined.request_id, code::BAD_REQUEST, "BAD_REQUEST", Some(e.to_string()));
            let _ = sink.send(Message::Text(frame)).await;
            close_with(&mut sink, close_code::UNAUTHENTICATED, "malformed join payload").await;
            return;
        }
    };

    let room_record = match collab.context.store.room_by_id(&room_id).await {
        Ok(record) => record,
        Err(_) => {
            let frame = error_frame(&joined.request_id, code::NOT_FOUND, "NOT_FOUND", None);
            let _ = sink.send(Message::Text(frame)).await;
            return;
        }
    };

    if room_record.is_deleted() {
        let frame = error_frame(&joined.request_id, code::NOT_FOUND, "NOT_FOUND", None);
        let _ = sink.send(Message::Text(frame)).await;
        return;
    }

    if !collab.context.permissions.may_join_room(user_id, &room_record) {
        let frame = error_frame(&joined.request_id, code::FORBIDDEN, "FORBIDDEN", None);
        let _ = sink.send(Message::Text(frame)).await;
        return;
    }

    if user_id.is_none() && !room_record.config.allow_anonymous {
        let frame = error_frame(&joined.request_id, code::UNAUTHENTICATED, "UNAUTHENTICATED", None);
        let _ = sink.send(Message::Text(frame)).await;
        return;
    }

    let identity = match user_id {
        Some(uid) => ParticipantIdentity::User(uid),
        None => ParticipantIdentity::Anonymous(Uuid::new_v4().to_string()),
    };

    let role = if room_record.owner_user_id.is_some() && room_record.owner_user_id == user_id {
        ParticipantRole::Host
    } else if join_payload.as_observer && room_record.config.allow_observers {
        ParticipantRole::Observer
    } else {
        ParticipantRole::Voter
    };

    let room = match collab.rooms.get_or_create(&room_id).await {
        Ok(room) => room,
        Err(e) => {
            let (c, symbol) = room_error_to_wire(&e);
            let frame = error_frame(&joined.request_id, c, symbol, None);
            let _ = sink.send(Message::Text(frame)).await;
            return;
        }
    };

    let participant = match room.join(identity, join_payload.display_name, role).await {
        Ok(p) => p,
        Err(e) => {
            let (c, symbol) = room_error_to_wire(&e);
            let frame = error_frame(&joined.request_id, c, symbol, None);
            let _ = sink.send(Message::Text(frame)).await;
            return;
        }
    };

    let (event_tx, mut event_rx) = mpsc::channel::<RoomEvent>(runtime_config.outbound_queue_capacity);
    let (connection, mut kick_rx) = RoomConnection::new(participant.id, participant.role, event_tx);
    let connection_id = connection.id;
    room.attach(connection);

    info!("participant {} attached to room {}", participant.id, room_id);

    let (raw_tx, mut raw_rx) = mpsc::channel::<String>(16);
    let mut last_pong = tokio::time::Instant::now();
    let mut heartbeat = tokio::time::interval(runtime_config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut kick_rx => {
                close_with(&mut sink, close_code::SLOW_CONSUMER, "slow consumer").await;
                break;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match OutboundFrame::from_room_event(&event) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to serialize outbound event: {e}"),
                }
            }
            raw = raw_rx.recv() => {
                let Some(text) = raw else { break };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_pong.elapsed() > runtime_config.heartbeat_timeout {
                    close_with(&mut sink, close_code::HEARTBEAT_TIMEOUT, "missed heartbeat").await;
                    break;
                }
                if sink.send(Message::Text(heartbeat_ping_frame())).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                let Some(message) = message else { break };
                let message = match message {
                    Ok(m) => m,
                    Err(_) => break,
                };

                match message {
                    Message::Close(_) => break,
                    Message::Text(text) => {
                        if !dispatch_inbound(
                            &text,
                            &room,
                            participant.id,
                            participant.role,
                            &mut last_pong,
                            &runtime_config,
                            &raw_tx,
                        ).await {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Err(e) = room.leave(participant.id).await {
        warn!("error leaving room {room_id} for participant {}: {e}", participant.id);
    }
    room.detach(connection_id);

    let registry_room_id = room_id.clone();
    let collab_for_release = collab.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        collab_for_release.rooms.release_if_empty(&registry_room_id);
    });
}

/// Waits for the first inbound frame, expecting `room.join.v1`. Any other
/// frame type, or a closed stream, ends the join phase without a room.
async fn await_join(stream: &mut SplitStream<WebSocket>) -> Option<InboundFrame> {
    while let Some(message) = stream.next().await {
        let message = message.ok()?;

        match message {
            Message::Text(text) => {
                let frame: InboundFrame = serde_json::from_str(&text).ok()?;
                if frame.frame_type == "room.join.v1" {
                    return Some(frame);
                }
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }

    None
}

/// Parses and routes one inbound frame per the table in spec §4.5. Returns
/// `false` if the connection should be closed.
async fn dispatch_inbound(
    text: &str,
    room: &Arc<Room>,
    participant_id: poker_core::ParticipantId,
    role: ParticipantRole,
    last_pong: &mut tokio::time::Instant,
    runtime_config: &RuntimeConfig,
    raw_tx: &mpsc::Sender<String>,
) -> bool {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = raw_tx
                .send(error_frame("", code::BAD_REQUEST, "BAD_REQUEST", Some(e.to_string())))
                .await;
            return true;
        }
    };

    match frame.frame_type.as_str() {
        "heartbeat.pong.v1" => {
            *last_pong = tokio::time::Instant::now();
            true
        }
        "round.start.v1" => {
            let payload: RoundStartPayload = match serde_json::from_value(frame.payload) {
                Ok(p) => p,
                Err(e) => return respond_bad_request(raw_tx, &frame.request_id, e).await,
            };

            let outcome = timeout(
                runtime_config.domain_operation_timeout,
                room.start_round(role, payload.story_title),
            )
            .await;

            respond_domain_result(raw_tx, &frame.request_id, outcome).await
        }
        "vote.cast.v1" => {
            let payload: VoteCastPayload = match serde_json::from_value(frame.payload) {
                Ok(p) => p,
                Err(e) => return respond_bad_request(raw_tx, &frame.request_id, e).await,
            };

            let Some(round_id) = room.active_round_id() else {
                let _ = raw_tx.send(error_frame(&frame.request_id, code::CONFLICT, "CONFLICT", None)).await;
                return true;
            };

            let outcome = timeout(
                runtime_config.domain_operation_timeout,
                room.cast_vote(round_id, participant_id, role, payload.card_value),
            )
            .await;

            respond_domain_result(raw_tx, &frame.request_id, outcome).await
        }
        "round.reveal.v1" => {
            let Some(round_id) = room.active_round_id() else {
                let _ = raw_tx.send(error_frame(&frame.request_id, code::CONFLICT, "CONFLICT", None)).await;
                return true;
            };

            let outcome = timeout(runtime_config.domain_operation_timeout, room.reveal_round(round_id, role)).await;
            respond_domain_result(raw_tx, &frame.request_id, outcome).await
        }
        "round.reset.v1" => {
            let Some(round_id) = room.active_round_id() else {
                let _ = raw_tx.send(error_frame(&frame.request_id, code::CONFLICT, "CONFLICT", None)).await;
                return true;
            };

            let outcome = timeout(runtime_config.domain_operation_timeout, room.reset_round(round_id, role)).await;
            respond_domain_result(raw_tx, &frame.request_id, outcome).await
        }
        other => {
            warn!("unknown inbound frame type: {other}");
            let _ = raw_tx.send(error_frame(&frame.request_id, code::BAD_REQUEST, "BAD_REQUEST", None)).await;
            true
        }
    }
}

async fn respond_bad_request(raw_tx: &mpsc::Sender<String>, request_id: &str, error: serde_json::Error) -> bool {
    let _ = raw_tx
        .send(error_frame(request_id, code::BAD_REQUEST, "BAD_REQUEST", Some(error.to_string())))
        .await;
    true
}

async fn respond_domain_result<T>(
    raw_tx: &mpsc::Sender<String>,
    request_id: &str,
    outcome: Result<Result<T, RoomError>, tokio::time::error::Elapsed>,
) -> bool {
    match outcome {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            let (c, symbol) = room_error_to_wire(&e);
            let _ = raw_tx.send(error_frame(request_id, c, symbol, None)).await;
            true
        }
        Err(_) => {
            let _ = raw_tx.send(error_frame(request_id, code::TIMEOUT, "TIMEOUT", None)).await;
            true
        }
    }
}

async fn close_with(sink: &mut SplitSink<WebSocket, Message>, close_status: u16, reason: &str) {
    let frame = Message::Close(Some(CloseFrame {
        code: close_status,
        reason: reason.to_string().into(),
    }));
    let _ = sink.send(frame).await;
}

//! WebSocket upgrade handler and envelope dispatch

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use prost::Message as _;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoomEvent;
use crate::protocol::{
    codec, ErrorResp, LoginReq, LoginResp, MsgType, Ping, PlayerInput, Pong, ReconnectReq,
    ReconnectResp, ServerBody, SkillCast, CURRENT_VERSION,
};
use crate::util::rate_limit::message_limiter;
use crate::util::time::unix_millis;
use crate::ws::client::{write_loop, Client, ClientHandle, PONG_WAIT};

const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(600);

/// WebSocket upgrade handler; authentication happens in-band via LOGIN_REQ
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.read_limit_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection: a write task draining the outbound queue and a read
/// loop dispatching frames, bounded by the heartbeat deadline
async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("websocket connected");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Vec<u8>>(state.config.send_queue_size);
    let shutdown = Arc::new(Notify::new());
    let handle = ClientHandle::new(tx, shutdown.clone(), state.metrics.clone());
    let client = Client::new(handle, message_limiter(state.config.max_msg_per_second));

    tokio::spawn(write_loop(sink, rx));

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("connection superseded");
                break;
            }
            frame = timeout(PONG_WAIT, stream.next()) => {
                match frame {
                    // Heartbeat deadline expired with no inbound traffic.
                    Err(_) => break,
                    Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        state
                            .metrics
                            .recv_bytes
                            .fetch_add(data.len() as u64, Ordering::Relaxed);
                        dispatch(&state, &client, &data);
                    }
                    Ok(Some(Ok(Message::Close(_)))) => break,
                    // Text, ping and pong frames carry no protocol payload.
                    Ok(Some(Ok(_))) => {}
                }
            }
        }
    }

    if let Some(player_id) = client.player_id() {
        let room_id = state.sessions.get(player_id).and_then(|s| s.room_id());

        // A superseded connection no longer owns the session; only a real
        // disconnect takes the player out of its room.
        if state.sessions.release(player_id, client.handle()) {
            if let Some(room_id) = room_id {
                state.rooms.send_event(room_id, RoomEvent::Leave(player_id));
            }
            info!(player_id = %player_id, "connection closed");
        }
    }
}

/// Per-frame pipeline: rate check, envelope decode, version gate, type switch
fn dispatch(state: &AppState, client: &Client, data: &[u8]) {
    if !client.allow_message() {
        send_error(client, 429, "rate limited");
        return;
    }

    let env = match codec::decode_envelope(data) {
        Ok(env) => env,
        Err(_) => {
            send_error(client, 400, "bad envelope");
            return;
        }
    };
    if env.version != 0 && env.version != CURRENT_VERSION {
        send_error(client, 426, "protocol version mismatch");
        return;
    }

    let Some(msg_type) = MsgType::from_i32(env.msg_type) else {
        send_error(client, 400, "unknown message");
        return;
    };

    // Unauthenticated message types.
    match msg_type {
        MsgType::Ping => {
            let Ok(req) = Ping::decode(env.body.as_slice()) else {
                send_error(client, 400, "bad ping");
                return;
            };
            send_direct(
                client,
                &ServerBody::Pong(Pong {
                    client_ts: req.client_ts,
                    server_ts: unix_millis() as i64,
                }),
            );
            return;
        }
        MsgType::LoginReq => {
            handle_login(state, client, &env.body);
            return;
        }
        MsgType::ReconnectReq => {
            handle_reconnect(state, client, &env.body);
            return;
        }
        _ => {}
    }

    let Some(player_id) = client.player_id() else {
        send_error(client, 401, "not logged in");
        return;
    };

    match msg_type {
        MsgType::MatchReq => {
            if !state.matcher.enqueue(player_id) {
                let _ = state.sessions.send(
                    player_id,
                    &ServerBody::Error(ErrorResp {
                        code: 429,
                        message: "match queue full".to_string(),
                    }),
                );
            }
        }
        MsgType::PlayerInput => {
            let Ok(input) = PlayerInput::decode(env.body.as_slice()) else {
                send_error(client, 400, "bad input");
                return;
            };
            if let Some(room_id) = player_room(state, player_id) {
                state
                    .rooms
                    .send_event(room_id, RoomEvent::Input(player_id, input));
            }
        }
        MsgType::SkillCast => {
            let Ok(skill) = SkillCast::decode(env.body.as_slice()) else {
                send_error(client, 400, "bad skill");
                return;
            };
            if let Some(room_id) = player_room(state, player_id) {
                state
                    .rooms
                    .send_event(room_id, RoomEvent::Skill(player_id, skill));
            }
        }
        _ => send_error(client, 400, "unknown message"),
    }
}

fn handle_login(state: &AppState, client: &Client, body: &[u8]) {
    let Ok(mut req) = LoginReq::decode(body) else {
        send_error(client, 400, "bad login");
        return;
    };
    if req.username.is_empty() {
        req.username = format!("player-{}", &Uuid::new_v4().to_string()[..8]);
    }

    let player_id = Uuid::new_v4();
    let access_token =
        state
            .auth
            .generate_access_token(player_id, &req.username, ACCESS_TOKEN_TTL);
    let reconnect_token = state
        .auth
        .generate_reconnect_token(player_id, state.config.reconnect_ttl);

    state.sessions.create(
        player_id,
        req.username.clone(),
        reconnect_token.clone(),
        client.handle().clone(),
    );
    client.set_player_id(player_id);

    info!(player_id = %player_id, username = %req.username, "player logged in");

    let _ = state.sessions.send(
        player_id,
        &ServerBody::LoginResp(LoginResp {
            player_id: player_id.to_string(),
            access_token,
            reconnect_token,
        }),
    );
}

fn handle_reconnect(state: &AppState, client: &Client, body: &[u8]) {
    let Ok(req) = ReconnectReq::decode(body) else {
        send_error(client, 400, "bad reconnect");
        return;
    };

    let player_id = match state.auth.parse_reconnect_token(&req.reconnect_token) {
        Ok(player_id) => player_id,
        Err(e) => {
            debug!(error = %e, "reconnect rejected");
            send_direct(
                client,
                &ServerBody::ReconnectResp(ReconnectResp {
                    ok: false,
                    reason: "invalid token".to_string(),
                    ..Default::default()
                }),
            );
            return;
        }
    };

    let Some(session) = state.sessions.bind(player_id, client.handle().clone()) else {
        send_direct(
            client,
            &ServerBody::ReconnectResp(ReconnectResp {
                ok: false,
                reason: "session not found".to_string(),
                ..Default::default()
            }),
        );
        return;
    };
    client.set_player_id(player_id);

    let room_id = session.room_id();
    send_direct(
        client,
        &ServerBody::ReconnectResp(ReconnectResp {
            player_id: player_id.to_string(),
            room_id: room_id.map(|r| r.to_string()).unwrap_or_default(),
            ok: true,
            reason: String::new(),
        }),
    );

    if let Some(room_id) = room_id {
        state.rooms.send_event(room_id, RoomEvent::Join(player_id));
    }
}

fn player_room(state: &AppState, player_id: Uuid) -> Option<Uuid> {
    state.sessions.get(player_id)?.room_id()
}

fn send_error(client: &Client, code: i32, message: &str) {
    send_direct(
        client,
        &ServerBody::Error(ErrorResp {
            code,
            message: message.to_string(),
        }),
    );
}

/// Connection-scoped reply outside any session (seq is always zero)
fn send_direct(client: &Client, body: &ServerBody) {
    let data = codec::encode_raw(body.msg_type(), body.encode_body(), 0);
    if client.handle().send(data).is_err() {
        warn!("direct send failed");
    }
}

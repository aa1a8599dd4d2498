// Per-connection WebSocket handling.
//
// The first frame on every socket must be `hello {session_token}`; the
// gate resolves it against the session store before anything is wired.
// Admitted sockets get a presence entry plus an outbound channel, and
// then run one select loop: heartbeat ticks, outbound fan-out, and
// inbound commands, in socket order.

use std::ops::ControlFlow;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use waypoint_common::protocol::ws::{ClientMessage, ServerMessage};
use waypoint_common::types::Identity;

use super::protocol;
use crate::auth::SessionStore;
use crate::chat;
use crate::error::{ws_error, ErrorCode};
use crate::metrics;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomStore;

/// Server-side liveness probe settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between protocol-level pings.
    pub interval: Duration,
    /// Disconnect when no pong arrives within this window.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval: Duration::from_millis(10_000), timeout: Duration::from_millis(30_000) }
    }
}

#[derive(Clone)]
pub struct RealtimeState {
    pub sessions: SessionStore,
    pub rooms: RoomStore,
    pub registry: PresenceRegistry,
    pub heartbeat: HeartbeatConfig,
}

pub fn router(state: RealtimeState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<RealtimeState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: RealtimeState, mut socket: WebSocket) {
    let Some(identity) = admit(&state, &mut socket).await else {
        return;
    };

    let conn_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerMessage>();
    state.registry.register(identity.clone(), conn_id, outbound_sender).await;
    info!(
        user_id = identity.user_id,
        username = %identity.username,
        conn_id = %conn_id,
        "socket admitted"
    );

    let hello_ack = ServerMessage::HelloAck {
        server_time: Utc::now(),
        user_id: identity.user_id,
        username: identity.username.clone(),
        is_admin: identity.is_admin,
    };
    if protocol::send_server_message(&mut socket, &hello_ack).await.is_err() {
        state.registry.unregister(identity.user_id, conn_id).await;
        return;
    }

    // Heartbeat: server pings every interval, disconnects if no pong
    // arrives within the timeout.
    let mut heartbeat_interval = tokio::time::interval(state.heartbeat.interval);
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > state.heartbeat.timeout {
                    warn!(
                        user_id = identity.user_id,
                        conn_id = %conn_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if protocol::send_server_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    // Channel closed: a newer connection for this
                    // identity superseded us.
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if dispatch_frame(&state, &identity, &mut socket, &raw_message).await.is_break() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    if state.registry.unregister(identity.user_id, conn_id).await {
        info!(
            user_id = identity.user_id,
            username = %identity.username,
            conn_id = %conn_id,
            "socket departed"
        );
    }
}

/// Connection gate: resolve the hello frame's session token to a
/// verified identity, or refuse the socket.
async fn admit(state: &RealtimeState, socket: &mut WebSocket) -> Option<Identity> {
    let started_at = Instant::now();
    let raw = match socket.recv().await {
        Some(Ok(Message::Text(raw))) => raw,
        _ => return None,
    };

    let refused = |elapsed: Duration| {
        metrics::record_ws_request("hello", true, elapsed.as_millis() as u64);
    };

    let session_token = match protocol::decode_message(&raw) {
        Ok(ClientMessage::Hello { session_token }) => session_token,
        Ok(_) | Err(_) => {
            refused(started_at.elapsed());
            warn!("refusing socket: first frame was not hello");
            let _ = protocol::send_server_message(
                socket,
                &ServerMessage::Error {
                    code: ErrorCode::InvalidMessage.as_str().to_owned(),
                    message: "first frame must be hello".to_owned(),
                    retryable: false,
                },
            )
            .await;
            let _ = socket.send(Message::Close(None)).await;
            return None;
        }
    };

    match state.sessions.verify(&session_token).await {
        Ok(Some(identity)) => {
            metrics::record_ws_request("hello", false, started_at.elapsed().as_millis() as u64);
            Some(identity)
        }
        Ok(None) => {
            refused(started_at.elapsed());
            warn!("refusing socket: session token did not resolve");
            let _ =
                protocol::send_server_message(socket, &ws_error(ErrorCode::Unauthenticated)).await;
            let _ = socket.send(Message::Close(None)).await;
            None
        }
        Err(error) => {
            refused(started_at.elapsed());
            error!(error = %error, "session lookup failed during admission");
            let _ = protocol::send_server_message(socket, &ws_error(ErrorCode::Storage)).await;
            let _ = socket.send(Message::Close(None)).await;
            None
        }
    }
}

async fn dispatch_frame(
    state: &RealtimeState,
    identity: &Identity,
    socket: &mut WebSocket,
    raw: &str,
) -> ControlFlow<()> {
    let frame = match protocol::decode_message(raw) {
        Ok(frame) => frame,
        Err(_) => {
            metrics::record_ws_request("invalid", true, 0);
            return send_or_break(socket, &ws_error(ErrorCode::InvalidMessage)).await;
        }
    };

    match frame {
        ClientMessage::Hello { .. } => {
            send_or_break(
                socket,
                &ServerMessage::Error {
                    code: ErrorCode::InvalidMessage.as_str().to_owned(),
                    message: "hello is only valid as the first frame".to_owned(),
                    retryable: false,
                },
            )
            .await
        }

        ClientMessage::UpdateLocation(fix) => {
            // Best-effort telemetry: bad coordinates and post-disconnect
            // races are dropped without an error frame.
            if !fix.lat.is_finite() || !fix.lon.is_finite() {
                return ControlFlow::Continue(());
            }
            let started_at = Instant::now();
            let failed = state.registry.update_location(identity.user_id, fix).await.is_err();
            metrics::record_ws_request(
                "update_location",
                failed,
                started_at.elapsed().as_millis() as u64,
            );
            ControlFlow::Continue(())
        }

        ClientMessage::SendMessage { room_id, content } => {
            let started_at = Instant::now();
            match chat::send_message(&state.rooms, &state.registry, identity, room_id, &content)
                .await
            {
                Ok(_) => {
                    metrics::record_ws_request(
                        "send_message",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    ControlFlow::Continue(())
                }
                Err(engine_error) => {
                    metrics::record_ws_request(
                        "send_message",
                        true,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_or_break(socket, &engine_error.to_ws()).await
                }
            }
        }

        ClientMessage::InitiatePrivateChat { target_user_id } => {
            let started_at = Instant::now();
            match chat::start_private_chat(&state.rooms, &state.registry, identity, target_user_id)
                .await
            {
                Ok(room_id) => {
                    metrics::record_ws_request(
                        "initiate_private_chat",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    debug!(
                        initiator = identity.user_id,
                        target = target_user_id,
                        room_id,
                        "private chat resolved"
                    );
                    ControlFlow::Continue(())
                }
                Err(engine_error) => {
                    metrics::record_ws_request(
                        "initiate_private_chat",
                        true,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_or_break(socket, &engine_error.to_ws()).await
                }
            }
        }

        ClientMessage::Ping { ts } => send_or_break(socket, &ServerMessage::Pong { ts }).await,

        ClientMessage::BackgroundMode { in_background } => {
            state.registry.set_background(identity.user_id, in_background).await;
            debug!(user_id = identity.user_id, in_background, "background mode changed");
            ControlFlow::Continue(())
        }

        ClientMessage::AppGoingBackground | ClientMessage::AppGoingForeground => {
            state.registry.touch_activity(identity.user_id).await;
            ControlFlow::Continue(())
        }
    }
}

async fn send_or_break(socket: &mut WebSocket, message: &ServerMessage) -> ControlFlow<()> {
    if protocol::send_server_message(socket, message).await.is_err() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

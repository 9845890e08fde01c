// WebSocket endpoint of the relay: one socket per session, one room per path.

use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use codesync_common::protocol::{document_id_from_room_key, RoomFrame};

use crate::hub::{FrameOutcome, HubStats, RoomHub};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

pub fn router(hub: RoomHub) -> Router {
    Router::new()
        .route("/rooms/{room_key}", get(ws_upgrade))
        .route("/stats", get(stats))
        .with_state(hub)
}

async fn stats(State(hub): State<RoomHub>) -> Json<HubStats> {
    Json(hub.stats().await)
}

pub async fn ws_upgrade(
    Path(room_key): Path<String>,
    State(hub): State<RoomHub>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> impl IntoResponse {
    if document_id_from_room_key(&room_key).is_none() {
        return (StatusCode::NOT_FOUND, "unknown room").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(hub, room_key, socket))
}

async fn handle_socket(hub: RoomHub, room_key: String, mut socket: WebSocket) {
    let (session_id, mut outbound) = hub.join(&room_key).await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > HEARTBEAT_TIMEOUT {
                    warn!(room = %room_key, session = %session_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(Ok(message)) = maybe_message else {
                    break;
                };
                last_seen = Instant::now();

                match message {
                    Message::Text(raw) => {
                        let frame = match RoomFrame::from_json(raw.as_str()) {
                            Ok(frame) => frame,
                            Err(error) => {
                                debug!(room = %room_key, session = %session_id, error = %error, "invalid frame");
                                let reply = RoomFrame::error("invalid_frame", "invalid websocket frame payload", true);
                                if send_frame(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        if hub.handle(&room_key, session_id, frame).await == FrameOutcome::Close {
                            flush_outbound(&mut socket, &mut outbound).await;
                            let _ = socket.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    hub.leave(&room_key, session_id).await;
}

/// Send frames already queued for the session, e.g. the error explaining a close.
async fn flush_outbound(
    socket: &mut WebSocket,
    outbound: &mut tokio::sync::mpsc::UnboundedReceiver<RoomFrame>,
) {
    while let Ok(frame) = outbound.try_recv() {
        if send_frame(socket, &frame).await.is_err() {
            return;
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &RoomFrame) -> Result<(), ()> {
    let encoded = frame.to_json().map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

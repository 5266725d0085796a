//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use assassin_common::{ConnectionId, PrefixedId};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time;

use crate::AppState;

use super::connection::GatewayConnection;
use super::events::{ClientCommand, EventName, GatewayMessage};
use super::fanout::BroadcastPayload;
use super::handler::{handle_command, handle_disconnect};

/// How often the server pings an idle client. A connection that stays silent
/// for two full intervals is closed.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Close code for a connection that stopped answering pings.
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn = GatewayConnection::new(ConnectionId::generate());
    let (ws_tx, ws_rx) = socket.split();

    // Subscribe before reading anything so no reply to our own commands is
    // missed.
    let broadcast_rx = state.broadcast.subscribe();

    tracing::info!(connection_id = %conn.connection_id, "gateway connection opened");

    run_connection(&state, &conn, ws_tx, ws_rx, broadcast_rx).await;

    handle_disconnect(&state, &conn);
    tracing::info!(connection_id = %conn.connection_id, "gateway connection closed");
}

/// Main connection loop: read client commands, forward broadcasts, ping.
async fn run_connection(
    state: &AppState,
    conn: &GatewayConnection,
    mut ws_tx: WsSink,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) {
    let mut ping_timer = time::interval(PING_INTERVAL);
    ping_timer.tick().await; // First tick fires immediately; skip it.
    let mut heard_from_client = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        heard_from_client = true;
                        let replies = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                            Ok(command) => handle_command(state, conn, command),
                            Err(err) => {
                                tracing::debug!(
                                    connection_id = %conn.connection_id,
                                    error = %err,
                                    "malformed client frame"
                                );
                                vec![GatewayMessage::error("Malformed message")]
                            }
                        };
                        for reply in &replies {
                            if send_message(&mut ws_tx, reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        heard_from_client = true;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %conn.connection_id, "ws read error");
                        return;
                    }
                    Some(Ok(_)) => {
                        let reply = GatewayMessage::error("Expected a JSON text frame");
                        if send_message(&mut ws_tx, &reply).await.is_err() {
                            return;
                        }
                    }
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if !conn.wants(&payload) {
                            continue;
                        }
                        let msg = GatewayMessage::event(&payload.event_name, payload.data.clone());
                        if send_message(&mut ws_tx, &msg).await.is_err() {
                            return;
                        }
                        if payload.event_name == EventName::LOBBY_DELETED {
                            conn.unsubscribe();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %conn.connection_id,
                            skipped = n,
                            "gateway connection lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }

            _ = ping_timer.tick() => {
                if !heard_from_client {
                    tracing::debug!(
                        connection_id = %conn.connection_id,
                        "ping timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Ping timeout").await;
                    return;
                }
                heard_from_client = false;
                if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_message(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

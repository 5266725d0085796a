//! `rejoin` command: reclaims a seat for a session on a new connection.

use serde_json::json;

use crate::AppState;

use super::connection::GatewayConnection;
use super::events::{EventName, GatewayMessage, RejoinPayload};

/// Process a `rejoin` command.
///
/// On success the connection is subscribed to the lobby, the rest of the
/// lobby hears `player-reconnected`, and the caller gets a full snapshot.
/// Failure is reported as `rejoin-failed` so the client knows to fall back to
/// the lobby screen.
pub fn handle_rejoin(
    state: &AppState,
    conn: &GatewayConnection,
    payload: RejoinPayload,
) -> Vec<GatewayMessage> {
    let rejoined = match state
        .lobbies
        .rejoin(&payload.session_id, &conn.connection_id)
    {
        Ok(rejoined) => rejoined,
        Err(err) => {
            tracing::debug!(
                connection_id = %conn.connection_id,
                kind = %err.kind,
                "rejoin failed"
            );
            return vec![GatewayMessage::event(
                EventName::REJOIN_FAILED,
                json!({ "message": err.message }),
            )];
        }
    };

    conn.subscribe(&rejoined.code);
    state.broadcast.to_lobby(
        &rejoined.code,
        EventName::PLAYER_RECONNECTED,
        json!({
            "playerName": rejoined.player_name,
            "players": rejoined.snapshot.players,
        }),
    );

    vec![GatewayMessage::event(
        EventName::REJOIN_SUCCESS,
        json!({
            "sessionId": payload.session_id,
            "snapshot": rejoined.snapshot,
        }),
    )]
}

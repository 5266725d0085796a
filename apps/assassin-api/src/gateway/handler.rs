//! Command dispatch: turns client commands into state-machine calls and the
//! resulting outcomes into notifications.
//!
//! Replies for the originating connection are returned to the caller, who
//! writes them straight to the socket. Everything addressed to anyone else
//! goes through the broadcast hub.

use serde_json::json;

use crate::error::GameError;
use crate::game::lobby::{KillCancelled, KillConfirmed, KillInitiated, Phase};
use crate::game::Disconnected;
use crate::AppState;

use super::connection::GatewayConnection;
use super::events::{
    ClientCommand, CreateLobbyPayload, EventName, GatewayMessage, JoinLobbyPayload, LobbyPayload,
};
use super::resume::handle_rejoin;

/// Process one client command. Failures become a single `error` reply.
pub fn handle_command(
    state: &AppState,
    conn: &GatewayConnection,
    command: ClientCommand,
) -> Vec<GatewayMessage> {
    let name = command.name();
    let result = match command {
        ClientCommand::Rejoin(payload) => Ok(handle_rejoin(state, conn, payload)),
        ClientCommand::CreateLobby(payload) => create_lobby(state, conn, payload),
        ClientCommand::JoinLobby(payload) => join_lobby(state, conn, payload),
        ClientCommand::StartGame(payload) => start_game(state, conn, payload),
        ClientCommand::InitiateKill(payload) => initiate_kill(state, conn, payload),
        ClientCommand::ConfirmDeath(payload) => confirm_death(state, conn, payload),
        ClientCommand::CancelKill(payload) => cancel_kill(state, conn, payload),
        ClientCommand::CancelKillKiller(payload) => cancel_kill_killer(state, conn, payload),
    };

    result.unwrap_or_else(|err| {
        tracing::debug!(
            connection_id = %conn.connection_id,
            command = name,
            kind = %err.kind,
            "command rejected"
        );
        vec![GatewayMessage::error(&err.message)]
    })
}

fn create_lobby(
    state: &AppState,
    conn: &GatewayConnection,
    payload: CreateLobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let seated = state
        .lobbies
        .create_lobby(&conn.connection_id, &payload.player_name)?;
    conn.subscribe(&seated.code);

    Ok(vec![GatewayMessage::event(
        EventName::LOBBY_CREATED,
        json!({
            "code": seated.code,
            "sessionId": seated.session_id,
            "playerName": seated.player_name,
            "players": seated.players,
            "isHost": true,
        }),
    )])
}

fn join_lobby(
    state: &AppState,
    conn: &GatewayConnection,
    payload: JoinLobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let code = payload.code.trim();
    let seated = state
        .lobbies
        .join_lobby(code, &conn.connection_id, &payload.player_name)?;
    conn.subscribe(&seated.code);

    state.broadcast.to_lobby(
        &seated.code,
        EventName::PLAYER_JOINED,
        json!({
            "playerName": seated.player_name,
            "players": seated.players,
        }),
    );

    Ok(vec![GatewayMessage::event(
        EventName::LOBBY_JOINED,
        json!({
            "code": seated.code,
            "sessionId": seated.session_id,
            "playerName": seated.player_name,
            "players": seated.players,
            "isHost": false,
        }),
    )])
}

fn start_game(
    state: &AppState,
    conn: &GatewayConnection,
    payload: LobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let started = state
        .lobbies
        .start_game(&payload.code, &conn.connection_id)?;

    for assignment in &started.assignments {
        state.broadcast.to_connection(
            &assignment.connection_id,
            EventName::GAME_STARTED,
            json!({
                "target": assignment.target_name,
                "allPlayers": started.players,
            }),
        );
    }
    state.broadcast.to_lobby(
        &payload.code,
        EventName::GAME_STATUS,
        json!({
            "phase": Phase::Playing,
            "aliveCount": started.players.len(),
            "winner": null,
            "allPlayers": started.players,
        }),
    );
    Ok(Vec::new())
}

fn initiate_kill(
    state: &AppState,
    conn: &GatewayConnection,
    payload: LobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let initiated = state
        .lobbies
        .initiate_kill(&payload.code, &conn.connection_id)?;
    let deadline = initiated.deadline.timestamp_millis();

    arm_kill_timer(state, &payload.code, &initiated);

    state.broadcast.to_connection(
        &initiated.victim_connection,
        EventName::KILL_PENDING,
        json!({ "deadline": deadline }),
    );
    Ok(vec![GatewayMessage::event(
        EventName::KILL_INITIATED,
        json!({
            "victimName": initiated.victim_name,
            "deadline": deadline,
        }),
    )])
}

fn confirm_death(
    state: &AppState,
    conn: &GatewayConnection,
    payload: LobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let confirmed = state
        .lobbies
        .confirm_kill(&payload.code, &conn.connection_id, false)?;
    announce_kill(state, &payload.code, &confirmed);
    Ok(Vec::new())
}

fn cancel_kill(
    state: &AppState,
    conn: &GatewayConnection,
    payload: LobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let cancelled = state
        .lobbies
        .cancel_kill(&payload.code, &conn.connection_id)?;
    announce_cancel(state, &cancelled);
    Ok(Vec::new())
}

fn cancel_kill_killer(
    state: &AppState,
    conn: &GatewayConnection,
    payload: LobbyPayload,
) -> Result<Vec<GatewayMessage>, GameError> {
    let cancelled = state
        .lobbies
        .cancel_kill_by_killer(&payload.code, &conn.connection_id)?;
    announce_cancel(state, &cancelled);
    Ok(Vec::new())
}

/// Arm the deadline for a pending kill. On expiry the kill resolves exactly
/// as if the victim had confirmed it, provided the same claim is still
/// pending.
fn arm_kill_timer(state: &AppState, code: &str, initiated: &KillInitiated) {
    let fire_state = state.clone();
    let code = code.to_string();
    let session = initiated.victim_session.clone();
    let deadline = initiated.deadline;

    state.timers.arm(
        &initiated.victim_session,
        state.config.kill_window,
        move || async move {
            match fire_state.lobbies.expire_kill(&code, &session, deadline) {
                Ok(confirmed) => announce_kill(&fire_state, &code, &confirmed),
                Err(err) => tracing::debug!(
                    %code,
                    victim_session = %session,
                    kind = %err.kind,
                    "expired kill had nothing to resolve"
                ),
            }
        },
    );
}

fn announce_kill(state: &AppState, code: &str, confirmed: &KillConfirmed) {
    state.timers.cancel(&confirmed.victim_session);

    state.broadcast.to_connection(
        &confirmed.victim_connection,
        EventName::YOU_DIED,
        json!({ "isAuto": confirmed.is_auto }),
    );
    state.broadcast.to_connection(
        &confirmed.killer_connection,
        EventName::KILL_CONFIRMED,
        json!({
            "victimName": confirmed.victim_name,
            "newTarget": confirmed.new_target,
            "isGameOver": confirmed.is_game_over(),
            "isAuto": confirmed.is_auto,
        }),
    );

    for voided in &confirmed.voided {
        state.timers.cancel(&voided.victim_session);
        for connection in [&voided.victim_connection, &voided.killer_connection] {
            state
                .broadcast
                .to_connection(connection, EventName::KILL_CANCELLED, json!({}));
        }
    }

    let phase = if confirmed.is_game_over() {
        Phase::Ended
    } else {
        Phase::Playing
    };
    state.broadcast.to_lobby(
        code,
        EventName::GAME_STATUS,
        json!({
            "phase": phase,
            "aliveCount": confirmed.alive_count,
            "winner": confirmed.winner,
            "allPlayers": confirmed.players,
        }),
    );
}

fn announce_cancel(state: &AppState, cancelled: &KillCancelled) {
    state.timers.cancel(&cancelled.victim_session);
    for connection in [&cancelled.victim_connection, &cancelled.killer_connection] {
        state
            .broadcast
            .to_connection(connection, EventName::KILL_CANCELLED, json!({}));
    }
}

/// Tell the lobby about a dropped connection.
pub fn handle_disconnect(state: &AppState, conn: &GatewayConnection) {
    let Some(outcome) = state.lobbies.handle_disconnect(&conn.connection_id) else {
        return;
    };
    conn.unsubscribe();

    match outcome {
        Disconnected::Left {
            code,
            player_name,
            players,
        }
        | Disconnected::WentOffline {
            code,
            player_name,
            players,
        } => {
            state.broadcast.to_lobby(
                &code,
                EventName::PLAYER_DISCONNECTED,
                json!({
                    "playerName": player_name,
                    "players": players,
                }),
            );
        }
        Disconnected::LobbyDeleted {
            code, host_left, ..
        } => {
            let reason = if host_left {
                "The host left the lobby"
            } else {
                "Everyone left the lobby"
            };
            state
                .broadcast
                .to_lobby(&code, EventName::LOBBY_DELETED, json!({ "reason": reason }));
        }
    }
}

//! Gateway event names and wire-format messages.
//!
//! Every frame, in both directions, is a JSON text frame of the form
//! `{"t": "<event-name>", "d": { ... }}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub t: String,
    pub d: Value,
}

impl GatewayMessage {
    pub fn event(event_name: &str, data: Value) -> Self {
        Self {
            t: event_name.to_string(),
            d: data,
        }
    }

    /// Build an `error` message for the originating connection.
    pub fn error(message: &str) -> Self {
        Self::event(EventName::ERROR, serde_json::json!({ "message": message }))
    }
}

// ---------------------------------------------------------------------------
// Client → Server commands
// ---------------------------------------------------------------------------

/// A command received from the client over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "kebab-case")]
pub enum ClientCommand {
    Rejoin(RejoinPayload),
    CreateLobby(CreateLobbyPayload),
    JoinLobby(JoinLobbyPayload),
    StartGame(LobbyPayload),
    InitiateKill(LobbyPayload),
    ConfirmDeath(LobbyPayload),
    CancelKill(LobbyPayload),
    CancelKillKiller(LobbyPayload),
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rejoin(_) => "rejoin",
            Self::CreateLobby(_) => "create-lobby",
            Self::JoinLobby(_) => "join-lobby",
            Self::StartGame(_) => "start-game",
            Self::InitiateKill(_) => "initiate-kill",
            Self::ConfirmDeath(_) => "confirm-death",
            Self::CancelKill(_) => "cancel-kill",
            Self::CancelKillKiller(_) => "cancel-kill-killer",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinPayload {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyPayload {
    pub player_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyPayload {
    pub code: String,
    pub player_name: String,
}

/// Payload for every in-lobby command.
#[derive(Debug, Deserialize)]
pub struct LobbyPayload {
    pub code: String,
}

// ---------------------------------------------------------------------------
// Notification names
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const LOBBY_CREATED: &'static str = "lobby-created";
    pub const LOBBY_JOINED: &'static str = "lobby-joined";
    pub const LOBBY_DELETED: &'static str = "lobby-deleted";
    pub const REJOIN_SUCCESS: &'static str = "rejoin-success";
    pub const REJOIN_FAILED: &'static str = "rejoin-failed";
    pub const PLAYER_JOINED: &'static str = "player-joined";
    pub const PLAYER_RECONNECTED: &'static str = "player-reconnected";
    pub const PLAYER_DISCONNECTED: &'static str = "player-disconnected";
    pub const GAME_STARTED: &'static str = "game-started";
    pub const GAME_STATUS: &'static str = "game-status";
    pub const KILL_PENDING: &'static str = "kill-pending";
    pub const KILL_INITIATED: &'static str = "kill-initiated";
    pub const KILL_CONFIRMED: &'static str = "kill-confirmed";
    pub const KILL_CANCELLED: &'static str = "kill-cancelled";
    pub const YOU_DIED: &'static str = "you-died";
    pub const ERROR: &'static str = "error";
}

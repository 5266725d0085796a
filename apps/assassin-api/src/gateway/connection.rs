//! Per-connection gateway state.

use parking_lot::Mutex;

use super::fanout::{Audience, BroadcastPayload};

/// State for a single WebSocket connection.
pub struct GatewayConnection {
    /// Volatile transport identity (`conn_` prefixed ULID).
    pub connection_id: String,
    /// The lobby whose broadcasts this connection receives, if any.
    lobby: Mutex<Option<String>>,
}

impl GatewayConnection {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            lobby: Mutex::new(None),
        }
    }

    /// Start receiving broadcasts for `code`.
    pub fn subscribe(&self, code: &str) {
        *self.lobby.lock() = Some(code.to_string());
    }

    pub fn unsubscribe(&self) {
        *self.lobby.lock() = None;
    }

    pub fn is_subscribed(&self, code: &str) -> bool {
        self.lobby.lock().as_deref() == Some(code)
    }

    /// Whether a broadcast is addressed to this connection.
    pub fn wants(&self, payload: &BroadcastPayload) -> bool {
        match &payload.audience {
            Audience::Connection(id) => *id == self.connection_id,
            Audience::Lobby(code) => self.is_subscribed(code),
        }
    }
}

//! Broadcast hub for dispatching gateway events to connected clients.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connection
//! subscribes and filters events locally by audience, which is enough for a
//! single-process server.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Who should receive a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Exactly one transport connection.
    Connection(String),
    /// Every connection currently subscribed to a lobby.
    Lobby(String),
}

/// A payload broadcast to all connected gateway clients.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub audience: Audience,
    /// The event name (e.g. "kill-pending").
    pub event_name: String,
    pub data: Value,
}

/// The global broadcast hub. Cloneable, stored in AppState.
#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each connection calls this once.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, payload: BroadcastPayload) {
        // send() returns Err if there are no receivers, which is fine.
        let _ = self.sender.send(Arc::new(payload));
    }

    pub fn to_connection(&self, connection_id: &str, event_name: &str, data: Value) {
        self.dispatch(BroadcastPayload {
            audience: Audience::Connection(connection_id.to_string()),
            event_name: event_name.to_string(),
            data,
        });
    }

    pub fn to_lobby(&self, code: &str, event_name: &str, data: Value) {
        self.dispatch(BroadcastPayload {
            audience: Audience::Lobby(code.to_string()),
            event_name: event_name.to_string(),
            data,
        });
    }
}

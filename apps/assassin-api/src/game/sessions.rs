//! Durable player sessions, independent of the transport connection.
//!
//! A session token is handed to the client when it takes a seat and is the
//! only thing it needs to reclaim that seat after reconnecting.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;

use assassin_common::id::prefix;

/// Number of random bytes in a session token.
const SESSION_TOKEN_BYTES: usize = 24;

/// What a session currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub lobby_code: String,
    pub connection_id: String,
    pub player_name: String,
}

/// Shared registry of all player sessions.
///
/// Mutations that must agree with a lobby's own state (issue, rebind,
/// remove) are made while the caller holds that lobby's lock.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    by_connection: DashMap<String, String>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    /// Mint a fresh token and bind it to a lobby seat.
    pub fn issue(&self, lobby_code: &str, connection_id: &str, player_name: &str) -> String {
        let entry = SessionEntry {
            lobby_code: lobby_code.to_string(),
            connection_id: connection_id.to_string(),
            player_name: player_name.to_string(),
        };
        loop {
            let token = generate_session_token();
            if let Entry::Vacant(slot) = self.sessions.entry(token.clone()) {
                slot.insert(entry);
                self.by_connection
                    .insert(connection_id.to_string(), token.clone());
                return token;
            }
        }
    }

    pub fn resolve(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.get(session_id).map(|e| e.clone())
    }

    /// Point a session at a new connection. The old connection's reverse
    /// binding is dropped.
    pub fn rebind(&self, session_id: &str, new_connection_id: &str) -> bool {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        let old = std::mem::replace(&mut entry.connection_id, new_connection_id.to_string());
        drop(entry);

        self.by_connection
            .remove_if(&old, |_, sid| sid == session_id);
        self.by_connection
            .insert(new_connection_id.to_string(), session_id.to_string());
        true
    }

    pub fn connection_to_session(&self, connection_id: &str) -> Option<String> {
        self.by_connection.get(connection_id).map(|s| s.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(session_id)?;
        self.by_connection
            .remove_if(&entry.connection_id, |_, sid| sid == session_id);
        Some(entry)
    }

    /// Drop every session seated in `lobby_code`. Returns how many were removed.
    pub fn remove_lobby(&self, lobby_code: &str) -> usize {
        let doomed: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.lobby_code == lobby_code)
            .map(|e| e.key().clone())
            .collect();
        doomed
            .iter()
            .filter(|sid| self.remove(sid).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Generate an opaque, URL-safe session token.
fn generate_session_token() -> String {
    let mut buf = [0u8; SESSION_TOKEN_BYTES];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix::SESSION, URL_SAFE_NO_PAD.encode(buf))
}

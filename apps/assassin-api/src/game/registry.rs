//! Active lobbies, one lock per lobby.
//!
//! Lobbies live in a `DashMap` keyed by their 4-digit code, each behind its
//! own `parking_lot::Mutex`. Every mutation of a lobby, including the timer
//! fire path, goes through [`LobbyRegistry::with_lobby`], so commands on one
//! lobby never interleave while different lobbies proceed in parallel.
//! Session registry updates that must agree with a lobby are made while
//! that lobby's lock is held.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::Config;
use crate::error::{ErrorKind, GameError};

use super::clock::Clock;
use super::lobby::{
    Departure, GameStarted, KillCancelled, KillConfirmed, KillInitiated, Lobby, LobbySnapshot,
    Phase, Player, PlayerView,
};
use super::sessions::SessionRegistry;

/// Lobby codes are drawn from this range.
const CODE_RANGE: std::ops::RangeInclusive<u16> = 1000..=9999;

/// Collisions tolerated before giving up on finding a free code.
const MAX_CODE_ATTEMPTS: usize = 100;

const MAX_NAME_CHARS: usize = 24;

/// A player took a seat (create or join).
#[derive(Debug, Clone)]
pub struct Seated {
    pub code: String,
    pub session_id: String,
    pub player_name: String,
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Clone)]
pub struct Rejoined {
    pub code: String,
    pub player_name: String,
    pub old_connection: String,
    pub snapshot: LobbySnapshot,
}

/// What a dropped connection did to its lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnected {
    /// Pre-game departure; the lobby lives on.
    Left {
        code: String,
        player_name: String,
        players: Vec<PlayerView>,
    },
    /// Pre-game departure that removed the lobby (host left or it emptied).
    LobbyDeleted {
        code: String,
        player_name: String,
        host_left: bool,
    },
    /// In-game; the seat is kept for rejoin.
    WentOffline {
        code: String,
        player_name: String,
        players: Vec<PlayerView>,
    },
}

pub struct LobbyRegistry {
    lobbies: DashMap<String, Arc<Mutex<Lobby>>>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    max_lobbies: usize,
    max_players: usize,
    min_players: usize,
    kill_window: Duration,
}

impl LobbyRegistry {
    pub fn new(config: &Config, sessions: Arc<SessionRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            lobbies: DashMap::new(),
            sessions,
            clock,
            max_lobbies: config.max_lobbies,
            max_players: config.max_players_per_lobby,
            min_players: config.min_players,
            kill_window: config.kill_window,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    fn handle(&self, code: &str) -> Result<Arc<Mutex<Lobby>>, GameError> {
        self.lobbies
            .get(code)
            .map(|l| Arc::clone(l.value()))
            .ok_or_else(GameError::lobby_not_found)
    }

    /// Run `f` with exclusive access to the lobby `code`.
    pub fn with_lobby<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut Lobby) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let handle = self.handle(code)?;
        let mut lobby = handle.lock();
        if lobby.is_closed() {
            return Err(GameError::lobby_not_found());
        }
        f(&mut *lobby)
    }

    /// Read-only look at a lobby, for health reporting and tests.
    pub fn inspect<T>(&self, code: &str, f: impl FnOnce(&Lobby) -> T) -> Option<T> {
        let handle = self.handle(code).ok()?;
        let lobby = handle.lock();
        (!lobby.is_closed()).then(|| f(&*lobby))
    }

    // -----------------------------------------------------------------------
    // Lobby store
    // -----------------------------------------------------------------------

    pub fn create_lobby(&self, connection_id: &str, host_name: &str) -> Result<Seated, GameError> {
        let name = validate_name(host_name)?;
        self.ensure_unseated(connection_id, None)?;
        if self.lobbies.len() >= self.max_lobbies {
            return Err(GameError::new(
                ErrorKind::TooManyLobbies,
                "Server is at capacity, try again later",
            ));
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = rng.gen_range(CODE_RANGE).to_string();
            let Entry::Vacant(slot) = self.lobbies.entry(code.clone()) else {
                continue;
            };

            let session_id = self.sessions.issue(&code, connection_id, &name);
            let host = Player::new(connection_id.to_string(), session_id.clone(), name.clone());
            let lobby = Lobby::new(code.clone(), host);
            let players = lobby.roster();
            slot.insert(Arc::new(Mutex::new(lobby)));

            tracing::info!(%code, %session_id, host = %name, "lobby created");
            return Ok(Seated {
                code,
                session_id,
                player_name: name,
                players,
            });
        }

        tracing::error!(
            lobbies = self.lobbies.len(),
            "could not find a free lobby code"
        );
        Err(GameError::new(
            ErrorKind::CodeSpaceExhausted,
            "Could not allocate a lobby code, try again later",
        ))
    }

    pub fn join_lobby(
        &self,
        code: &str,
        connection_id: &str,
        player_name: &str,
    ) -> Result<Seated, GameError> {
        let name = validate_name(player_name)?;
        self.ensure_unseated(connection_id, None)?;
        self.with_lobby(code, |lobby| {
            lobby.check_joinable(&name, self.max_players)?;
            let session_id = self.sessions.issue(code, connection_id, &name);
            lobby.seat(Player::new(
                connection_id.to_string(),
                session_id.clone(),
                name.clone(),
            ));
            tracing::info!(%code, %session_id, player = %name, "player joined lobby");
            Ok(Seated {
                code: code.to_string(),
                session_id,
                player_name: name,
                players: lobby.roster(),
            })
        })
    }

    /// Remove a lobby and every session seated in it.
    pub fn delete_lobby(&self, code: &str) -> bool {
        let Ok(handle) = self.handle(code) else {
            return false;
        };
        let mut lobby = handle.lock();
        if lobby.is_closed() {
            return false;
        }
        self.delete_locked(&mut lobby);
        true
    }

    fn delete_locked(&self, lobby: &mut Lobby) {
        lobby.close();
        self.lobbies.remove(lobby.code());
        let removed = self.sessions.remove_lobby(lobby.code());
        tracing::info!(code = %lobby.code(), sessions = removed, "lobby deleted");
    }

    /// Reject a connection that already holds a seat in a live lobby, unless
    /// that seat belongs to `allowed_session`. A seat in a finished game does
    /// not count.
    fn ensure_unseated(
        &self,
        connection_id: &str,
        allowed_session: Option<&str>,
    ) -> Result<(), GameError> {
        let Some(session_id) = self.sessions.connection_to_session(connection_id) else {
            return Ok(());
        };
        if allowed_session == Some(session_id.as_str()) {
            return Ok(());
        }
        let Some(entry) = self.sessions.resolve(&session_id) else {
            return Ok(());
        };
        let seated = self
            .inspect(&entry.lobby_code, |lobby| lobby.phase() != Phase::Ended)
            .unwrap_or(false);
        if seated {
            return Err(GameError::new(
                ErrorKind::AlreadyInLobby,
                "You are already in a lobby",
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Game transitions
    // -----------------------------------------------------------------------

    pub fn start_game(&self, code: &str, requester: &str) -> Result<GameStarted, GameError> {
        self.with_lobby(code, |lobby| {
            let started = lobby.start_game(requester, self.min_players, &mut rand::thread_rng())?;
            tracing::info!(%code, players = started.players.len(), "game started");
            Ok(started)
        })
    }

    pub fn initiate_kill(&self, code: &str, killer: &str) -> Result<KillInitiated, GameError> {
        let window = chrono::Duration::from_std(self.kill_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let deadline = self.clock.now() + window;
        self.with_lobby(code, |lobby| {
            let initiated = lobby.initiate_kill(killer, deadline)?;
            tracing::info!(
                %code,
                victim_session = %initiated.victim_session,
                "kill initiated"
            );
            Ok(initiated)
        })
    }

    pub fn confirm_kill(
        &self,
        code: &str,
        victim: &str,
        is_auto: bool,
    ) -> Result<KillConfirmed, GameError> {
        self.with_lobby(code, |lobby| {
            let confirmed = lobby.confirm_kill(victim, is_auto)?;
            log_confirmed(code, &confirmed);
            Ok(confirmed)
        })
    }

    pub fn confirm_kill_by_session(
        &self,
        code: &str,
        victim_session: &str,
        is_auto: bool,
    ) -> Result<KillConfirmed, GameError> {
        self.with_lobby(code, |lobby| {
            let confirmed = lobby.confirm_kill_by_session(victim_session, is_auto)?;
            log_confirmed(code, &confirmed);
            Ok(confirmed)
        })
    }

    /// Resolve a claim whose timer ran out. See [`Lobby::expire_kill`].
    pub fn expire_kill(
        &self,
        code: &str,
        victim_session: &str,
        deadline: DateTime<Utc>,
    ) -> Result<KillConfirmed, GameError> {
        self.with_lobby(code, |lobby| {
            let confirmed = lobby.expire_kill(victim_session, deadline)?;
            log_confirmed(code, &confirmed);
            Ok(confirmed)
        })
    }

    pub fn cancel_kill(&self, code: &str, victim: &str) -> Result<KillCancelled, GameError> {
        self.with_lobby(code, |lobby| lobby.cancel_kill(victim))
    }

    pub fn cancel_kill_by_killer(
        &self,
        code: &str,
        killer: &str,
    ) -> Result<KillCancelled, GameError> {
        self.with_lobby(code, |lobby| lobby.cancel_kill_by_killer(killer))
    }

    /// Handle a dropped connection. Returns `None` when the connection held
    /// no seat, or a seat that has since moved to another connection.
    pub fn handle_disconnect(&self, connection_id: &str) -> Option<Disconnected> {
        let session_id = self.sessions.connection_to_session(connection_id)?;
        let code = self.sessions.resolve(&session_id)?.lobby_code;
        let handle = self.handle(&code).ok()?;
        let mut lobby = handle.lock();
        if lobby.is_closed() {
            return None;
        }

        match lobby.disconnect(connection_id) {
            Departure::Stale => None,
            Departure::MarkedDisconnected { name } => {
                tracing::info!(%code, %session_id, "player disconnected mid-game");
                Some(Disconnected::WentOffline {
                    code,
                    player_name: name,
                    players: lobby.roster(),
                })
            }
            Departure::Removed {
                session_id,
                name,
                host_left,
                now_empty,
            } => {
                self.sessions.remove(&session_id);
                if host_left || now_empty {
                    self.delete_locked(&mut lobby);
                    Some(Disconnected::LobbyDeleted {
                        code,
                        player_name: name,
                        host_left,
                    })
                } else {
                    tracing::info!(%code, %session_id, "player left lobby");
                    Some(Disconnected::Left {
                        code,
                        player_name: name,
                        players: lobby.roster(),
                    })
                }
            }
        }
    }

    /// Re-seat a session on a new connection.
    pub fn rejoin(&self, session_id: &str, new_connection: &str) -> Result<Rejoined, GameError> {
        let entry = self
            .sessions
            .resolve(session_id)
            .ok_or_else(GameError::session_not_found)?;
        self.ensure_unseated(new_connection, Some(session_id))?;

        let result = self.with_lobby(&entry.lobby_code, |lobby| {
            let migrated = lobby.migrate(session_id, new_connection)?;
            self.sessions.rebind(session_id, new_connection);
            Ok(Rejoined {
                code: lobby.code().to_string(),
                player_name: migrated.name,
                old_connection: migrated.old_connection,
                snapshot: migrated.snapshot,
            })
        });

        match &result {
            Ok(rejoined) => {
                tracing::info!(code = %rejoined.code, %session_id, "player rejoined");
            }
            Err(err) if err.kind == ErrorKind::LobbyNotFound => {
                self.sessions.remove(session_id);
            }
            Err(_) => {}
        }
        result
    }
}

fn log_confirmed(code: &str, confirmed: &KillConfirmed) {
    tracing::info!(
        %code,
        victim_session = %confirmed.victim_session,
        alive = confirmed.alive_count,
        auto = confirmed.is_auto,
        "kill confirmed"
    );
    if let Some(winner) = &confirmed.winner {
        tracing::info!(%code, %winner, "game over");
    }
}

fn validate_name(raw: &str) -> Result<String, GameError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err(GameError::new(
            ErrorKind::InvalidName,
            format!("Name must be between 1 and {MAX_NAME_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

//! Per-lobby game state machine.
//!
//! A [`Lobby`] is plain data plus synchronous transitions. It never touches
//! the network, the clock or a timer; the registry serializes access to it
//! and the gateway turns the returned outcomes into notifications.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::error::{ErrorKind, GameError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Waiting,
    Playing,
    Ended,
}

/// A seated player. `connection_id` is volatile; `session_id` is not.
#[derive(Debug, Clone)]
pub struct Player {
    pub connection_id: String,
    pub session_id: String,
    pub name: String,
    pub alive: bool,
    pub connected: bool,
}

impl Player {
    pub fn new(connection_id: String, session_id: String, name: String) -> Self {
        Self {
            connection_id,
            session_id,
            name,
            alive: true,
            connected: true,
        }
    }
}

/// An unconfirmed elimination claim, keyed by the victim's connection id.
#[derive(Debug, Clone)]
pub struct PendingKill {
    pub killer: String,
    pub deadline: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Public roster entry. Never includes targeting information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub name: String,
    pub alive: bool,
    pub connected: bool,
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingKill {
    pub victim_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub deadline: DateTime<Utc>,
}

/// What one player is allowed to know about their own position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfView {
    pub name: String,
    pub alive: bool,
    pub is_host: bool,
    pub target: Option<String>,
    /// Set when someone has claimed this player and is awaiting confirmation.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub pending_deadline: Option<DateTime<Utc>>,
    pub outgoing_kill: Option<OutgoingKill>,
}

/// Everything a reconnecting client needs to render where it left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub code: String,
    pub phase: Phase,
    pub alive_count: usize,
    pub winner: Option<String>,
    pub players: Vec<PlayerView>,
    pub you: SelfView,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TargetAssignment {
    pub connection_id: String,
    pub target_name: String,
}

#[derive(Debug, Clone)]
pub struct GameStarted {
    pub assignments: Vec<TargetAssignment>,
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Clone)]
pub struct KillInitiated {
    pub killer_connection: String,
    pub victim_connection: String,
    pub victim_session: String,
    pub victim_name: String,
    pub deadline: DateTime<Utc>,
}

/// A pending kill dropped because it can no longer resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidedKill {
    pub killer_connection: String,
    pub victim_connection: String,
    pub victim_session: String,
}

#[derive(Debug, Clone)]
pub struct KillConfirmed {
    pub killer_connection: String,
    pub victim_connection: String,
    pub victim_session: String,
    pub victim_name: String,
    /// The killer's inherited target; `None` once the game is over.
    pub new_target: Option<String>,
    pub winner: Option<String>,
    pub alive_count: usize,
    pub is_auto: bool,
    pub voided: Vec<VoidedKill>,
    pub players: Vec<PlayerView>,
}

impl KillConfirmed {
    pub fn is_game_over(&self) -> bool {
        self.winner.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCancelled {
    pub killer_connection: String,
    pub victim_connection: String,
    pub victim_session: String,
}

/// Result of a connection dropping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// Pre-game: the player was unseated.
    Removed {
        session_id: String,
        name: String,
        host_left: bool,
        now_empty: bool,
    },
    /// In-game: the seat is kept for rejoin.
    MarkedDisconnected { name: String },
    /// The connection no longer belongs to any seat (already rebound).
    Stale,
}

#[derive(Debug, Clone)]
pub struct Migrated {
    pub old_connection: String,
    pub name: String,
    pub snapshot: LobbySnapshot,
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Lobby {
    code: String,
    host_session_id: String,
    phase: Phase,
    /// Join order is kept for stable rosters.
    players: Vec<Player>,
    targets: HashMap<String, String>,
    pending_kills: HashMap<String, PendingKill>,
    winner: Option<String>,
    closed: bool,
}

impl Lobby {
    pub fn new(code: String, host: Player) -> Self {
        Self {
            code,
            host_session_id: host.session_id.clone(),
            phase: Phase::Waiting,
            players: vec![host],
            targets: HashMap::new(),
            pending_kills: HashMap::new(),
            winner: None,
            closed: false,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A closed lobby has been removed from the registry; commands that were
    /// queued on its lock must treat it as gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    pub fn winner_name(&self) -> Option<&str> {
        let winner = self.winner.as_deref()?;
        self.player_by_session(winner).map(|p| p.name.as_str())
    }

    pub fn target_of(&self, connection_id: &str) -> Option<&str> {
        self.targets.get(connection_id).map(String::as_str)
    }

    pub fn targets(&self) -> &HashMap<String, String> {
        &self.targets
    }

    pub fn pending_kill(&self, victim_connection: &str) -> Option<&PendingKill> {
        self.pending_kills.get(victim_connection)
    }

    pub fn pending_kills(&self) -> &HashMap<String, PendingKill> {
        &self.pending_kills
    }

    pub fn player_by_connection(&self, connection_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.connection_id == connection_id)
    }

    pub fn player_by_session(&self, session_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.session_id == session_id)
    }

    fn name_of(&self, connection_id: &str) -> Option<String> {
        self.player_by_connection(connection_id).map(|p| p.name.clone())
    }

    fn session_of(&self, connection_id: &str) -> Option<String> {
        self.player_by_connection(connection_id)
            .map(|p| p.session_id.clone())
    }

    pub fn roster(&self) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|p| PlayerView {
                name: p.name.clone(),
                alive: p.alive,
                connected: p.connected,
                is_host: p.session_id == self.host_session_id,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Seating
    // -----------------------------------------------------------------------

    /// Check that a player called `name` could take a seat right now.
    pub fn check_joinable(&self, name: &str, max_players: usize) -> Result<(), GameError> {
        if self.phase != Phase::Waiting {
            return Err(GameError::new(
                ErrorKind::AlreadyStarted,
                "Game has already started",
            ));
        }
        if self.players.len() >= max_players {
            return Err(GameError::new(ErrorKind::LobbyFull, "Lobby is full"));
        }
        if self
            .players
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Err(GameError::new(
                ErrorKind::NameTaken,
                "That name is already taken in this lobby",
            ));
        }
        Ok(())
    }

    /// Seat a player. Callers must have run [`Lobby::check_joinable`] under
    /// the same lock.
    pub fn seat(&mut self, player: Player) {
        self.players.push(player);
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Start the game, linking a uniformly shuffled ordering of the players
    /// into a single target cycle.
    pub fn start_game<R: Rng + ?Sized>(
        &mut self,
        requester_connection: &str,
        min_players: usize,
        rng: &mut R,
    ) -> Result<GameStarted, GameError> {
        if self.phase != Phase::Waiting {
            return Err(GameError::invalid_phase("Game has already started"));
        }
        let is_host = self
            .player_by_session(&self.host_session_id)
            .is_some_and(|host| host.connection_id == requester_connection);
        if !is_host {
            return Err(GameError::new(
                ErrorKind::NotHost,
                "Only the host can start the game",
            ));
        }
        if self.players.len() < min_players {
            return Err(GameError::new(
                ErrorKind::NotEnoughPlayers,
                format!("Need at least {min_players} players to start"),
            ));
        }

        let mut order: Vec<String> = self
            .players
            .iter()
            .map(|p| p.connection_id.clone())
            .collect();
        order.shuffle(rng);

        self.targets = order
            .iter()
            .zip(order.iter().cycle().skip(1))
            .map(|(hunter, target)| (hunter.clone(), target.clone()))
            .collect();
        self.pending_kills.clear();
        for player in &mut self.players {
            player.alive = true;
        }
        self.phase = Phase::Playing;

        let assignments = self
            .players
            .iter()
            .filter_map(|p| {
                let target = self.targets.get(&p.connection_id)?;
                Some(TargetAssignment {
                    connection_id: p.connection_id.clone(),
                    target_name: self.name_of(target)?,
                })
            })
            .collect();

        Ok(GameStarted {
            assignments,
            players: self.roster(),
        })
    }

    /// Claim the caller's current target. The deadline is supplied by the
    /// caller, who is also responsible for arming the timer.
    pub fn initiate_kill(
        &mut self,
        killer_connection: &str,
        deadline: DateTime<Utc>,
    ) -> Result<KillInitiated, GameError> {
        if self.phase != Phase::Playing {
            return Err(GameError::invalid_phase("Game is not in progress"));
        }
        let killer = self
            .player_by_connection(killer_connection)
            .ok_or_else(GameError::player_not_found)?;
        if !killer.alive {
            return Err(GameError::new(ErrorKind::NotAlive, "You are not alive"));
        }
        let victim_connection = self
            .targets
            .get(killer_connection)
            .filter(|t| t.as_str() != killer_connection)
            .cloned()
            .ok_or_else(|| GameError::new(ErrorKind::NoTarget, "You have no target"))?;
        let victim = self
            .player_by_connection(&victim_connection)
            .filter(|v| v.alive)
            .ok_or_else(|| {
                GameError::new(ErrorKind::TargetNotAlive, "Your target is no longer alive")
            })?;
        let victim_session = victim.session_id.clone();
        let victim_name = victim.name.clone();

        if self.pending_kills.contains_key(&victim_connection) {
            return Err(GameError::new(
                ErrorKind::KillAlreadyPending,
                "A kill on your target is already pending",
            ));
        }

        self.pending_kills.insert(
            victim_connection.clone(),
            PendingKill {
                killer: killer_connection.to_string(),
                deadline,
            },
        );

        Ok(KillInitiated {
            killer_connection: killer_connection.to_string(),
            victim_connection,
            victim_session,
            victim_name,
            deadline,
        })
    }

    /// Resolve the pending kill on `victim_connection`: the victim dies and
    /// whoever hunted them inherits their target.
    pub fn confirm_kill(
        &mut self,
        victim_connection: &str,
        is_auto: bool,
    ) -> Result<KillConfirmed, GameError> {
        if self.phase != Phase::Playing {
            return Err(GameError::invalid_phase("Game is not in progress"));
        }
        if !self.pending_kills.contains_key(victim_connection) {
            return Err(GameError::no_pending_action());
        }
        let victim_idx = self
            .players
            .iter()
            .position(|p| p.connection_id == victim_connection)
            .ok_or_else(GameError::player_not_found)?;
        let Some(pending) = self.pending_kills.remove(victim_connection) else {
            return Err(GameError::no_pending_action());
        };

        self.players[victim_idx].alive = false;
        let victim_session = self.players[victim_idx].session_id.clone();
        let victim_name = self.players[victim_idx].name.clone();

        // Re-splice: hunter -> victim -> next collapses to hunter -> next.
        let victims_target = self.targets.remove(victim_connection);
        let hunter = self
            .targets
            .iter()
            .find(|(_, target)| target.as_str() == victim_connection)
            .map(|(hunter, _)| hunter.clone());
        if let (Some(hunter), Some(next)) = (hunter, victims_target) {
            self.targets.insert(hunter, next);
        }

        // Claims made by the dead player die with them.
        let mut voided = self.void_where(|_, kill| kill.killer == victim_connection);

        let alive_count = self.alive_count();
        let mut new_target = None;
        if alive_count <= 1 {
            self.phase = Phase::Ended;
            self.winner = self
                .players
                .iter()
                .find(|p| p.alive)
                .map(|p| p.session_id.clone());
            self.targets.retain(|hunter, target| *hunter != *target);
            voided.extend(self.void_where(|_, _| true));
        } else {
            new_target = self
                .targets
                .get(&pending.killer)
                .and_then(|t| self.name_of(t));
        }

        Ok(KillConfirmed {
            killer_connection: pending.killer,
            victim_connection: victim_connection.to_string(),
            victim_session,
            victim_name,
            new_target,
            winner: self.winner_name().map(str::to_string),
            alive_count,
            is_auto,
            voided,
            players: self.roster(),
        })
    }

    /// Same as [`Lobby::confirm_kill`], addressed by the victim's durable
    /// session so callers holding a stale connection id still hit the right
    /// seat.
    pub fn confirm_kill_by_session(
        &mut self,
        victim_session: &str,
        is_auto: bool,
    ) -> Result<KillConfirmed, GameError> {
        let victim_connection = self
            .player_by_session(victim_session)
            .map(|p| p.connection_id.clone())
            .ok_or_else(GameError::player_not_found)?;
        self.confirm_kill(&victim_connection, is_auto)
    }

    /// Resolve a claim whose deadline passed. Only the claim that was pending
    /// with exactly `deadline` resolves; a newer claim on the same victim is
    /// left alone.
    pub fn expire_kill(
        &mut self,
        victim_session: &str,
        deadline: DateTime<Utc>,
    ) -> Result<KillConfirmed, GameError> {
        let victim_connection = self
            .player_by_session(victim_session)
            .map(|p| p.connection_id.clone())
            .ok_or_else(GameError::player_not_found)?;
        match self.pending_kills.get(&victim_connection) {
            Some(pending) if pending.deadline == deadline => {
                self.confirm_kill(&victim_connection, true)
            }
            _ => Err(GameError::no_pending_action()),
        }
    }

    /// The victim refuses the claim.
    pub fn cancel_kill(&mut self, victim_connection: &str) -> Result<KillCancelled, GameError> {
        let pending = self
            .pending_kills
            .remove(victim_connection)
            .ok_or_else(GameError::no_pending_action)?;
        Ok(KillCancelled {
            killer_connection: pending.killer,
            victim_connection: victim_connection.to_string(),
            victim_session: self.session_of(victim_connection).unwrap_or_default(),
        })
    }

    /// The killer retracts their claim.
    pub fn cancel_kill_by_killer(
        &mut self,
        killer_connection: &str,
    ) -> Result<KillCancelled, GameError> {
        let victim_connection = self
            .pending_kills
            .iter()
            .find(|(_, kill)| kill.killer == killer_connection)
            .map(|(victim, _)| victim.clone())
            .ok_or_else(GameError::no_pending_action)?;
        self.pending_kills.remove(&victim_connection);
        Ok(KillCancelled {
            killer_connection: killer_connection.to_string(),
            victim_session: self.session_of(&victim_connection).unwrap_or_default(),
            victim_connection,
        })
    }

    pub fn disconnect(&mut self, connection_id: &str) -> Departure {
        let Some(idx) = self
            .players
            .iter()
            .position(|p| p.connection_id == connection_id)
        else {
            return Departure::Stale;
        };

        if self.phase == Phase::Waiting {
            let player = self.players.remove(idx);
            Departure::Removed {
                host_left: player.session_id == self.host_session_id,
                now_empty: self.players.is_empty(),
                session_id: player.session_id,
                name: player.name,
            }
        } else {
            let player = &mut self.players[idx];
            player.connected = false;
            Departure::MarkedDisconnected {
                name: player.name.clone(),
            }
        }
    }

    /// Move a session's seat onto a new connection, rewriting every target
    /// and pending-kill edge that referenced the old connection id.
    pub fn migrate(
        &mut self,
        session_id: &str,
        new_connection: &str,
    ) -> Result<Migrated, GameError> {
        let player = self
            .players
            .iter_mut()
            .find(|p| p.session_id == session_id)
            .ok_or_else(GameError::player_not_found)?;
        let old_connection =
            std::mem::replace(&mut player.connection_id, new_connection.to_string());
        player.connected = true;
        let name = player.name.clone();

        if old_connection != new_connection {
            if let Some(target) = self.targets.remove(&old_connection) {
                self.targets.insert(new_connection.to_string(), target);
            }
            for target in self.targets.values_mut() {
                if *target == old_connection {
                    *target = new_connection.to_string();
                }
            }

            if let Some(kill) = self.pending_kills.remove(&old_connection) {
                self.pending_kills.insert(new_connection.to_string(), kill);
            }
            for kill in self.pending_kills.values_mut() {
                if kill.killer == old_connection {
                    kill.killer = new_connection.to_string();
                }
            }
        }

        let snapshot = self
            .snapshot_for(session_id)
            .ok_or_else(GameError::player_not_found)?;
        Ok(Migrated {
            old_connection,
            name,
            snapshot,
        })
    }

    pub fn snapshot_for(&self, session_id: &str) -> Option<LobbySnapshot> {
        let me = self.player_by_session(session_id)?;
        let conn = me.connection_id.as_str();

        let outgoing_kill = self
            .pending_kills
            .iter()
            .find(|(_, kill)| kill.killer == conn)
            .and_then(|(victim, kill)| {
                Some(OutgoingKill {
                    victim_name: self.name_of(victim)?,
                    deadline: kill.deadline,
                })
            });

        Some(LobbySnapshot {
            code: self.code.clone(),
            phase: self.phase,
            alive_count: self.alive_count(),
            winner: self.winner_name().map(str::to_string),
            players: self.roster(),
            you: SelfView {
                name: me.name.clone(),
                alive: me.alive,
                is_host: me.session_id == self.host_session_id,
                target: self
                    .targets
                    .get(conn)
                    .filter(|_| me.alive)
                    .and_then(|t| self.name_of(t)),
                pending_deadline: self.pending_kills.get(conn).map(|k| k.deadline),
                outgoing_kill,
            },
        })
    }

    fn void_where<F>(&mut self, mut predicate: F) -> Vec<VoidedKill>
    where
        F: FnMut(&str, &PendingKill) -> bool,
    {
        let victims: Vec<String> = self
            .pending_kills
            .iter()
            .filter(|&(victim, kill)| predicate(victim.as_str(), kill))
            .map(|(victim, _)| victim.clone())
            .collect();

        victims
            .into_iter()
            .filter_map(|victim| {
                let kill = self.pending_kills.remove(&victim)?;
                Some(VoidedKill {
                    killer_connection: kill.killer,
                    victim_session: self.session_of(&victim).unwrap_or_default(),
                    victim_connection: victim,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::error::ErrorCategory;

    fn deadline() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_015, 0).unwrap()
    }

    fn player(tag: &str) -> Player {
        Player::new(format!("conn_{tag}"), format!("ses_{tag}"), tag.to_string())
    }

    fn lobby_with(tags: &[&str]) -> Lobby {
        let mut lobby = Lobby::new("1234".to_string(), player(tags[0]));
        for tag in &tags[1..] {
            lobby.check_joinable(tag, 20).unwrap();
            lobby.seat(player(tag));
        }
        lobby
    }

    fn started(tags: &[&str], seed: u64) -> Lobby {
        let mut lobby = lobby_with(tags);
        let host = lobby.players()[0].connection_id.clone();
        lobby
            .start_game(&host, 3, &mut StdRng::seed_from_u64(seed))
            .unwrap();
        lobby
    }

    /// Walk the target map from any alive player and check it is one cycle
    /// over exactly the alive players.
    fn assert_single_cycle(lobby: &Lobby) {
        let alive: HashSet<&str> = lobby
            .players()
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.connection_id.as_str())
            .collect();
        let keys: HashSet<&str> = lobby.targets().keys().map(String::as_str).collect();
        assert_eq!(keys, alive, "targets keyed by exactly the alive players");

        let start = *alive.iter().next().unwrap();
        let mut seen = HashSet::new();
        let mut cur = start;
        loop {
            assert!(seen.insert(cur), "revisited {cur} before closing the cycle");
            let next = lobby.target_of(cur).unwrap();
            assert_ne!(next, cur, "self-loop on {cur}");
            assert!(alive.contains(next), "{cur} targets a dead player");
            cur = next;
            if cur == start {
                break;
            }
        }
        assert_eq!(seen.len(), alive.len());
    }

    fn hunter_of<'a>(lobby: &'a Lobby, victim: &str) -> &'a str {
        lobby
            .targets()
            .iter()
            .find(|(_, t)| t.as_str() == victim)
            .map(|(h, _)| h.as_str())
            .unwrap()
    }

    #[test]
    fn start_builds_single_cycle_for_many_seeds() {
        for seed in 0..50 {
            let lobby = started(&["a", "b", "c", "d", "e", "f"], seed);
            assert_eq!(lobby.phase(), Phase::Playing);
            assert_single_cycle(&lobby);
        }
    }

    #[test]
    fn start_reports_each_players_target_name() {
        let mut lobby = lobby_with(&["a", "b", "c"]);
        let started = lobby
            .start_game("conn_a", 3, &mut StdRng::seed_from_u64(7))
            .unwrap();
        assert_eq!(started.assignments.len(), 3);
        for assignment in &started.assignments {
            let target_conn = lobby.target_of(&assignment.connection_id).unwrap();
            let target = lobby.player_by_connection(target_conn).unwrap();
            assert_eq!(target.name, assignment.target_name);
        }
    }

    #[test]
    fn start_requires_host_and_enough_players() {
        let mut lobby = lobby_with(&["a", "b"]);
        let err = lobby
            .start_game("conn_a", 3, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotEnoughPlayers);

        lobby.seat(player("c"));
        let err = lobby
            .start_game("conn_b", 3, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotHost);
        assert_eq!(lobby.phase(), Phase::Waiting);

        lobby
            .start_game("conn_a", 3, &mut StdRng::seed_from_u64(1))
            .unwrap();
        let err = lobby
            .start_game("conn_a", 3, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPhase);
    }

    #[test]
    fn join_checks() {
        let mut lobby = lobby_with(&["a", "b"]);
        assert_eq!(
            lobby.check_joinable("A", 20).unwrap_err().kind,
            ErrorKind::NameTaken
        );
        assert_eq!(
            lobby.check_joinable("c", 2).unwrap_err().kind,
            ErrorKind::LobbyFull
        );
        lobby.seat(player("c"));
        lobby
            .start_game("conn_a", 3, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(
            lobby.check_joinable("d", 20).unwrap_err().kind,
            ErrorKind::AlreadyStarted
        );
    }

    #[test]
    fn confirm_resplices_killer_onto_victims_target() {
        let mut lobby = started(&["a", "b", "c", "d"], 3);
        let killer = "conn_a";
        let victim = lobby.target_of(killer).unwrap().to_string();
        let victims_target = lobby.target_of(&victim).unwrap().to_string();

        let initiated = lobby.initiate_kill(killer, deadline()).unwrap();
        assert_eq!(initiated.victim_connection, victim);
        assert_eq!(initiated.deadline, deadline());

        let confirmed = lobby.confirm_kill(&victim, false).unwrap();
        assert_eq!(confirmed.killer_connection, killer);
        assert_eq!(confirmed.alive_count, 3);
        assert!(!confirmed.is_game_over());
        assert_eq!(lobby.target_of(killer), Some(victims_target.as_str()));
        assert_eq!(
            confirmed.new_target.as_deref(),
            Some(lobby.player_by_connection(&victims_target).unwrap().name.as_str())
        );
        assert!(lobby.pending_kill(&victim).is_none());
        assert_single_cycle(&lobby);
    }

    #[test]
    fn second_confirm_or_cancel_is_rejected_without_change() {
        let mut lobby = started(&["a", "b", "c", "d"], 11);
        let victim = lobby.target_of("conn_a").unwrap().to_string();
        lobby.initiate_kill("conn_a", deadline()).unwrap();
        lobby.confirm_kill(&victim, false).unwrap();

        let targets_before = lobby.targets().clone();
        for err in [
            lobby.confirm_kill(&victim, false).unwrap_err(),
            lobby.confirm_kill(&victim, true).unwrap_err(),
            lobby.cancel_kill(&victim).unwrap_err(),
            lobby.cancel_kill_by_killer("conn_a").unwrap_err(),
        ] {
            assert_eq!(err.kind, ErrorKind::NoPendingAction);
            assert_eq!(err.category(), ErrorCategory::PreconditionFailed);
        }
        assert_eq!(lobby.targets(), &targets_before);
        assert_eq!(lobby.alive_count(), 3);
    }

    #[test]
    fn kills_until_one_remains_declares_winner() {
        let mut lobby = started(&["a", "b", "c", "d", "e"], 5);
        let mut killer = "conn_c".to_string();
        for expected_alive in (1..5).rev() {
            let victim = lobby.target_of(&killer).unwrap().to_string();
            lobby.initiate_kill(&killer, deadline()).unwrap();
            let confirmed = lobby.confirm_kill(&victim, true).unwrap();
            assert_eq!(confirmed.alive_count, expected_alive);
            assert!(confirmed.is_auto);
            if expected_alive > 1 {
                assert_single_cycle(&lobby);
                // Alternate killers so more than one player scores.
                killer = lobby.target_of(&killer).unwrap().to_string();
            } else {
                assert!(confirmed.is_game_over());
                assert!(confirmed.new_target.is_none());
            }
        }

        assert_eq!(lobby.phase(), Phase::Ended);
        let survivor = lobby.players().iter().find(|p| p.alive).unwrap().clone();
        assert_eq!(lobby.winner_name(), Some(survivor.name.as_str()));
        let err = lobby
            .initiate_kill(&survivor.connection_id, deadline())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPhase);
    }

    #[test]
    fn initiate_rejects_dead_killer_and_duplicate_claims() {
        let mut lobby = started(&["a", "b", "c", "d"], 9);
        let victim = lobby.target_of("conn_a").unwrap().to_string();
        lobby.initiate_kill("conn_a", deadline()).unwrap();
        assert_eq!(
            lobby.initiate_kill("conn_a", deadline()).unwrap_err().kind,
            ErrorKind::KillAlreadyPending
        );
        lobby.confirm_kill(&victim, false).unwrap();
        assert_eq!(
            lobby.initiate_kill(&victim, deadline()).unwrap_err().kind,
            ErrorKind::NotAlive
        );
        assert_eq!(
            lobby.initiate_kill("conn_zz", deadline()).unwrap_err().kind,
            ErrorKind::PlayerNotFound
        );
    }

    #[test]
    fn victims_own_claim_is_voided_when_they_die() {
        let mut lobby = started(&["a", "b", "c", "d"], 21);
        let victim = lobby.target_of("conn_a").unwrap().to_string();
        let victims_victim = lobby.target_of(&victim).unwrap().to_string();

        lobby.initiate_kill(&victim, deadline()).unwrap();
        lobby.initiate_kill("conn_a", deadline()).unwrap();
        let confirmed = lobby.confirm_kill(&victim, false).unwrap();

        assert_eq!(confirmed.voided.len(), 1);
        assert_eq!(confirmed.voided[0].victim_connection, victims_victim);
        assert_eq!(confirmed.voided[0].killer_connection, victim);
        assert!(lobby.pending_kills().is_empty());
    }

    #[test]
    fn cancel_by_victim_and_by_killer() {
        let mut lobby = started(&["a", "b", "c"], 2);
        let victim = lobby.target_of("conn_a").unwrap().to_string();

        lobby.initiate_kill("conn_a", deadline()).unwrap();
        let cancelled = lobby.cancel_kill(&victim).unwrap();
        assert_eq!(cancelled.killer_connection, "conn_a");
        assert_eq!(
            cancelled.victim_session,
            lobby.player_by_connection(&victim).unwrap().session_id
        );

        lobby.initiate_kill("conn_a", deadline()).unwrap();
        let cancelled = lobby.cancel_kill_by_killer("conn_a").unwrap();
        assert_eq!(cancelled.victim_connection, victim);
        assert!(lobby.pending_kills().is_empty());
        assert_eq!(lobby.alive_count(), 3);
        assert_single_cycle(&lobby);
    }

    #[test]
    fn disconnect_in_waiting_unseats_player() {
        let mut lobby = lobby_with(&["a", "b"]);
        assert_eq!(
            lobby.disconnect("conn_b"),
            Departure::Removed {
                session_id: "ses_b".to_string(),
                name: "b".to_string(),
                host_left: false,
                now_empty: false,
            }
        );
        match lobby.disconnect("conn_a") {
            Departure::Removed {
                host_left,
                now_empty,
                ..
            } => assert!(host_left && now_empty),
            other => panic!("unexpected departure {other:?}"),
        }
    }

    #[test]
    fn disconnect_in_game_keeps_seat_and_edges() {
        let mut lobby = started(&["a", "b", "c"], 4);
        let targets = lobby.targets().clone();
        assert_eq!(
            lobby.disconnect("conn_b"),
            Departure::MarkedDisconnected {
                name: "b".to_string()
            }
        );
        assert!(!lobby.player_by_session("ses_b").unwrap().connected);
        assert_eq!(lobby.targets(), &targets);
        assert_eq!(lobby.disconnect("conn_gone"), Departure::Stale);
    }

    #[test]
    fn migrate_rewrites_every_edge() {
        let mut lobby = started(&["a", "b", "c", "d"], 8);
        let b_hunter = hunter_of(&lobby, "conn_b").to_string();
        let b_target = lobby.target_of("conn_b").unwrap().to_string();

        // b is both a pending victim and a pending killer.
        lobby.initiate_kill(&b_hunter, deadline()).unwrap();
        lobby.initiate_kill("conn_b", deadline()).unwrap();
        lobby.disconnect("conn_b");

        let migrated = lobby.migrate("ses_b", "conn_b2").unwrap();
        assert_eq!(migrated.old_connection, "conn_b");

        let mentions_old = lobby
            .targets()
            .iter()
            .any(|(k, v)| k == "conn_b" || v == "conn_b")
            || lobby
                .pending_kills()
                .iter()
                .any(|(k, v)| k == "conn_b" || v.killer == "conn_b");
        assert!(!mentions_old);

        assert_eq!(lobby.target_of("conn_b2"), Some(b_target.as_str()));
        assert_eq!(lobby.target_of(&b_hunter), Some("conn_b2"));
        assert_eq!(lobby.pending_kill("conn_b2").unwrap().killer, b_hunter);
        assert_eq!(lobby.pending_kill(&b_target).unwrap().killer, "conn_b2");
        assert_single_cycle(&lobby);

        let you = &migrated.snapshot.you;
        assert!(you.alive && !you.is_host);
        assert_eq!(you.pending_deadline, Some(deadline()));
        assert!(you.outgoing_kill.is_some());
        assert!(lobby.player_by_session("ses_b").unwrap().connected);
    }

    #[test]
    fn host_identity_survives_host_migration() {
        let mut lobby = lobby_with(&["a", "b", "c"]);
        lobby.migrate("ses_a", "conn_a2").unwrap();
        assert_eq!(
            lobby
                .start_game("conn_a", 3, &mut StdRng::seed_from_u64(1))
                .unwrap_err()
                .kind,
            ErrorKind::NotHost
        );
        lobby
            .start_game("conn_a2", 3, &mut StdRng::seed_from_u64(1))
            .unwrap();
    }

    #[test]
    fn confirm_by_session_follows_rebound_connection() {
        let mut lobby = started(&["a", "b", "c"], 6);
        let victim = lobby.target_of("conn_a").unwrap().to_string();
        let victim_session = lobby.player_by_connection(&victim).unwrap().session_id.clone();
        lobby.initiate_kill("conn_a", deadline()).unwrap();
        lobby.migrate(&victim_session, "conn_new").unwrap();

        let confirmed = lobby.confirm_kill_by_session(&victim_session, true).unwrap();
        assert_eq!(confirmed.victim_connection, "conn_new");
        assert!(confirmed.is_auto);
        assert_single_cycle(&lobby);
    }

    #[test]
    fn expiry_only_resolves_the_claim_it_was_armed_for() {
        let mut lobby = started(&["a", "b", "c"], 6);
        let victim = lobby.target_of("conn_a").unwrap().to_string();
        let victim_session = lobby.player_by_connection(&victim).unwrap().session_id.clone();

        lobby.initiate_kill("conn_a", deadline()).unwrap();
        lobby.cancel_kill(&victim).unwrap();
        let later = deadline() + chrono::Duration::seconds(10);
        lobby.initiate_kill("conn_a", later).unwrap();

        let err = lobby.expire_kill(&victim_session, deadline()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoPendingAction);
        assert_eq!(lobby.alive_count(), 3);
        assert!(lobby.pending_kill(&victim).is_some());

        let confirmed = lobby.expire_kill(&victim_session, later).unwrap();
        assert!(confirmed.is_auto);
        assert_eq!(confirmed.alive_count, 2);
        assert_single_cycle(&lobby);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let lobby = started(&["a", "b", "c"], 1);
        let snapshot = lobby.snapshot_for("ses_a").unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "playing");
        assert_eq!(json["aliveCount"], 3);
        assert_eq!(json["you"]["isHost"], true);
        assert!(json["you"]["target"].is_string());
        assert!(json["you"]["pendingDeadline"].is_null());
    }
}

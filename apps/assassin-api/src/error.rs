//! Game error taxonomy.
//!
//! Every state-machine operation returns `Result<_, GameError>`. Errors are
//! always local to the command that caused them; the gateway reports the
//! message to the originating connection and nobody else.

use std::fmt;

use thiserror::Error;

/// Broad error category, used for reporting and in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    PreconditionFailed,
    CapacityExceeded,
    ResourceExhaustion,
}

/// The specific reason a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LobbyNotFound,
    SessionNotFound,
    PlayerNotFound,
    NotHost,
    InvalidPhase,
    AlreadyStarted,
    NotEnoughPlayers,
    NotAlive,
    NoTarget,
    TargetNotAlive,
    KillAlreadyPending,
    NoPendingAction,
    AlreadyInLobby,
    InvalidName,
    NameTaken,
    LobbyFull,
    TooManyLobbies,
    CodeSpaceExhausted,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            LobbyNotFound | SessionNotFound | PlayerNotFound => ErrorCategory::NotFound,
            LobbyFull | TooManyLobbies => ErrorCategory::CapacityExceeded,
            CodeSpaceExhausted => ErrorCategory::ResourceExhaustion,
            NotHost | InvalidPhase | AlreadyStarted | NotEnoughPlayers | NotAlive | NoTarget
            | TargetNotAlive | KillAlreadyPending | NoPendingAction | AlreadyInLobby
            | InvalidName | NameTaken => ErrorCategory::PreconditionFailed,
        }
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        use ErrorKind::*;
        match self {
            LobbyNotFound => "LOBBY_NOT_FOUND",
            SessionNotFound => "SESSION_NOT_FOUND",
            PlayerNotFound => "PLAYER_NOT_FOUND",
            NotHost => "NOT_HOST",
            InvalidPhase => "INVALID_PHASE",
            AlreadyStarted => "ALREADY_STARTED",
            NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            NotAlive => "NOT_ALIVE",
            NoTarget => "NO_TARGET",
            TargetNotAlive => "TARGET_NOT_ALIVE",
            KillAlreadyPending => "KILL_ALREADY_PENDING",
            NoPendingAction => "NO_PENDING_ACTION",
            AlreadyInLobby => "ALREADY_IN_LOBBY",
            InvalidName => "INVALID_NAME",
            NameTaken => "NAME_TAKEN",
            LobbyFull => "LOBBY_FULL",
            TooManyLobbies => "TOO_MANY_LOBBIES",
            CodeSpaceExhausted => "CODE_SPACE_EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A rejected game command: the reason plus a message fit for players.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GameError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GameError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn lobby_not_found() -> Self {
        Self::new(ErrorKind::LobbyNotFound, "Lobby not found")
    }

    pub fn session_not_found() -> Self {
        Self::new(ErrorKind::SessionNotFound, "Session not found")
    }

    pub fn player_not_found() -> Self {
        Self::new(ErrorKind::PlayerNotFound, "Player not found in lobby")
    }

    pub fn invalid_phase(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPhase, message)
    }

    pub fn no_pending_action() -> Self {
        Self::new(ErrorKind::NoPendingAction, "No pending kill")
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

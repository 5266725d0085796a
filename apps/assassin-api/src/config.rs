use std::str::FromStr;
use std::time::Duration;

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Maximum number of lobbies that may exist at once.
    ///
    /// Lobbies whose game has started are kept until the process exits, so
    /// every game ever started counts against this cap for the lifetime of
    /// the process. Once it is reached, `create-lobby` fails with
    /// `TooManyLobbies` until restart.
    pub max_lobbies: usize,
    /// Maximum number of players seated in one lobby.
    pub max_players_per_lobby: usize,
    /// Minimum number of players required to start a game.
    pub min_players: usize,
    /// How long a victim has to confirm a pending kill before it resolves.
    pub kill_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            max_lobbies: 1000,
            max_players_per_lobby: 20,
            min_players: 3,
            kill_window: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; missing or unparsable values fall back to
    /// [`Config::default`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            max_lobbies: parsed_var("MAX_LOBBIES").unwrap_or(defaults.max_lobbies),
            max_players_per_lobby: parsed_var("MAX_PLAYERS_PER_LOBBY")
                .unwrap_or(defaults.max_players_per_lobby),
            min_players: parsed_var::<usize>("MIN_PLAYERS")
                .filter(|n| *n >= 2)
                .unwrap_or(defaults.min_players),
            kill_window: parsed_var("KILL_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.kill_window),
        }
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

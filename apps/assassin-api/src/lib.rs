pub mod config;
pub mod error;
pub mod game;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use config::Config;
use game::{Clock, KillTimers, LobbyRegistry, SessionRegistry, SystemClock};
use gateway::fanout::GatewayBroadcast;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobbies: Arc<LobbyRegistry>,
    pub timers: Arc<KillTimers>,
    pub broadcast: Arc<GatewayBroadcast>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build state with an explicit clock for kill deadlines.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let lobbies = Arc::new(LobbyRegistry::new(&config, sessions, clock));
        Self {
            config: Arc::new(config),
            lobbies,
            timers: Arc::new(KillTimers::new()),
            broadcast: Arc::new(GatewayBroadcast::new()),
        }
    }
}

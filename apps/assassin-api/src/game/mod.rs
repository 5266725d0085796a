//! Game core: sessions, lobbies, the per-lobby state machine and kill timers.

pub mod clock;
pub mod lobby;
pub mod registry;
pub mod sessions;
pub mod timer;

pub use clock::{Clock, SystemClock};
pub use lobby::{Lobby, LobbySnapshot, Phase, PlayerView};
pub use registry::{Disconnected, LobbyRegistry, Rejoined, Seated};
pub use sessions::SessionRegistry;
pub use timer::KillTimers;

use std::{sync::Arc, time::Instant};

use tab_core::{bot::BotApplication, config::Config};
use tab_teams::InboundAuth;

/// Shared handler state.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub bot: Arc<BotApplication>,
    pub auth: InboundAuth,
    /// Port reported by the bound socket.
    pub port: u16,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, bot: Arc<BotApplication>, auth: InboundAuth, port: u16) -> Self {
        Self {
            cfg,
            bot,
            auth,
            port,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

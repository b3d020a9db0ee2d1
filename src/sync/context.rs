//! Immutable poll context, built once at startup.

use tracing::info;

use crate::fetch::{FetchError, ScoreSource};
use crate::models::{GameMode, Player, PlayerRef};
use crate::storage::DEFAULT_RETENTION;

/// Everything a sweep reads but never changes.
#[derive(Debug, Clone)]
pub struct PollContext {
    /// Resolved roster, in configuration order
    pub roster: Vec<Player>,

    /// Modes polled per player
    pub modes: Vec<GameMode>,

    /// Destination channel id; re-validated every sweep
    pub channel_id: String,

    /// Records kept per (player, mode)
    pub retention: usize,
}

impl PollContext {
    pub fn new(roster: Vec<Player>, channel_id: impl Into<String>) -> Self {
        Self {
            roster,
            modes: GameMode::ALL.to_vec(),
            channel_id: channel_id.into(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Resolve every roster entry through the score source. Any failure is
    /// fatal: the roster is fixed for the life of the process.
    pub async fn resolve(
        refs: &[PlayerRef],
        source: &dyn ScoreSource,
        channel_id: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let mut roster = Vec::with_capacity(refs.len());
        for player_ref in refs {
            let player = source.fetch_player(player_ref).await?;
            info!("Watching {} ({})", player.name, player.id);
            roster.push(player);
        }
        Ok(Self::new(roster, channel_id))
    }

    /// Upstream requests per sweep.
    pub fn requests_per_sweep(&self) -> usize {
        self.roster.len() * self.modes.len()
    }
}

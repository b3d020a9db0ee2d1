//! Local persistence.
//!
//! The data directory holds the dedup database, the only state that must
//! survive a restart.

mod dedup;

pub use dedup::*;

use std::path::PathBuf;
use thiserror::Error;

use crate::models::GameMode;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Score {score_id} already recorded for player {player_id} ({mode})")]
    Conflict {
        player_id: u64,
        mode: GameMode,
        score_id: u64,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
}

impl StorageConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            database_file: default_database_file(),
        }
    }

    pub fn with_database_file(mut self, file: impl Into<String>) -> Self {
        self.database_file = file.into();
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

pub(crate) fn default_database_file() -> String {
    "score-watch.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

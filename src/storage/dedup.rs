//! Dedup store for already-notified scores.
//!
//! One SQLite table of (player, mode, score) triples. The surrogate `id` is
//! store-wide and never reused, so ordering by it gives insertion order across
//! restarts. Each (player, mode) partition is pruned to a retention window
//! after every insertion.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::StorageError;
use crate::models::GameMode;

/// Records kept per (player, mode) partition.
pub const DEFAULT_RETENTION: usize = 10;

/// A seen score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    /// Store-wide surrogate sequence number
    pub seq: i64,
    pub player_id: u64,
    pub mode: GameMode,
    pub score_id: u64,
}

#[derive(sqlx::FromRow)]
struct SeenScoreRow {
    id: i64,
    player_id: i64,
    score_id: i64,
    mode: String,
}

impl TryFrom<SeenScoreRow> for DedupRecord {
    type Error = StorageError;

    fn try_from(row: SeenScoreRow) -> Result<Self, Self::Error> {
        let mode = GameMode::from_str(&row.mode).map_err(StorageError::Corrupt)?;
        Ok(Self {
            seq: row.id,
            player_id: row.player_id as u64,
            mode,
            score_id: row.score_id as u64,
        })
    }
}

/// SQLite-backed dedup store.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        info!("Opened dedup store at {:?}", path);
        Ok(store)
    }

    /// A private in-memory store. Contents are lost when it is dropped.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is its own database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL,
                score_id INTEGER NOT NULL,
                mode TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS seen_scores_triple
            ON seen_scores (player_id, score_id, mode)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether the exact (player, mode, score) triple has been recorded.
    pub async fn exists(
        &self,
        player_id: u64,
        mode: GameMode,
        score_id: u64,
    ) -> Result<bool, StorageError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM seen_scores WHERE player_id = ? AND mode = ? AND score_id = ?",
        )
        .bind(player_id as i64)
        .bind(mode.as_str())
        .bind(score_id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0 > 0)
    }

    /// Record a triple. Fails with `StorageError::Conflict` if it already exists.
    pub async fn insert(
        &self,
        player_id: u64,
        mode: GameMode,
        score_id: u64,
    ) -> Result<DedupRecord, StorageError> {
        let result = sqlx::query("INSERT INTO seen_scores (player_id, score_id, mode) VALUES (?, ?, ?)")
            .bind(player_id as i64)
            .bind(score_id as i64)
            .bind(mode.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => {
                let record = DedupRecord {
                    seq: done.last_insert_rowid(),
                    player_id,
                    mode,
                    score_id,
                };
                debug!(
                    "Recorded score {} for player {} ({}) as #{}",
                    score_id, player_id, mode, record.seq
                );
                Ok(record)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StorageError::Conflict {
                    player_id,
                    mode,
                    score_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All records of one partition, most recent first.
    pub async fn list_partition(
        &self,
        player_id: u64,
        mode: GameMode,
    ) -> Result<Vec<DedupRecord>, StorageError> {
        let rows = sqlx::query_as::<_, SeenScoreRow>(
            "SELECT id, player_id, score_id, mode FROM seen_scores WHERE player_id = ? AND mode = ? ORDER BY id DESC",
        )
        .bind(player_id as i64)
        .bind(mode.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DedupRecord::try_from).collect()
    }

    /// Delete everything but the `keep` most recent records of a partition.
    /// Returns the number of records removed.
    pub async fn prune(
        &self,
        player_id: u64,
        mode: GameMode,
        keep: usize,
    ) -> Result<usize, StorageError> {
        let records = self.list_partition(player_id, mode).await?;
        if records.len() <= keep {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for record in &records[keep..] {
            removed += sqlx::query("DELETE FROM seen_scores WHERE id = ?")
                .bind(record.seq)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(
            "Pruned {} records for player {} ({})",
            removed, player_id, mode
        );
        Ok(removed as usize)
    }

    /// Total number of records in the store.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_scores")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }

    /// Close the underlying pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

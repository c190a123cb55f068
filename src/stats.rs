//! All-time stats persistence.
//!
//! Win counts and click totals survive restarts so the idle screen can show
//! an all-time leaderboard between shows. The backend is a two-operation
//! seam (load/save, plus an explicit clear for the host's reset) so tests
//! and ephemeral runs can swap the JSON file for memory.

use crate::types::LeaderboardEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Schema version for the stats file format
pub const STATS_SCHEMA_VERSION: u32 = 1;

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerTotals {
    pub wins: u32,
    pub rounds_played: u32,
    pub total_clicks: u64,
    pub best_reaction_ms: Option<u32>,
}

/// The persisted aggregate, keyed by display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllTimeStats {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// Last update timestamp (ISO8601)
    pub updated_at: String,
    pub total_rounds: u64,
    pub players: HashMap<String, PlayerTotals>,
}

impl Default for AllTimeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AllTimeStats {
    pub fn new() -> Self {
        Self {
            schema_version: STATS_SCHEMA_VERSION,
            updated_at: chrono::Utc::now().to_rfc3339(),
            total_rounds: 0,
            players: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_rounds == 0 && self.players.is_empty()
    }

    /// Fold one finished round into the totals
    pub fn record_round(&mut self, final_board: &[LeaderboardEntry], winner: Option<&str>) {
        self.total_rounds += 1;
        for entry in final_board {
            let totals = self.players.entry(entry.name.clone()).or_default();
            totals.rounds_played += 1;
            totals.total_clicks += entry.clicks as u64;
            if let Some(ms) = entry.reaction_time_ms {
                totals.best_reaction_ms = Some(match totals.best_reaction_ms {
                    Some(best) => best.min(ms),
                    None => ms,
                });
            }
        }
        if let Some(name) = winner {
            self.players.entry(name.to_string()).or_default().wins += 1;
        }
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// Validate loaded stats before trusting them
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version == 0 {
            return Err("missing schema version".to_string());
        }
        if self.schema_version > STATS_SCHEMA_VERSION {
            return Err(format!(
                "stats schema version {} is newer than supported version {}",
                self.schema_version, STATS_SCHEMA_VERSION
            ));
        }
        for (name, totals) in &self.players {
            if totals.wins > totals.rounds_played {
                return Err(format!("player '{}' has more wins than rounds played", name));
            }
            if u64::from(totals.rounds_played) > self.total_rounds {
                return Err(format!(
                    "player '{}' played more rounds than were recorded",
                    name
                ));
            }
        }
        Ok(())
    }
}

/// Storage seam for the all-time aggregate
#[async_trait]
pub trait StatsBackend: Send + Sync {
    /// Load the persisted aggregate; a missing or corrupt store yields a
    /// fresh empty one, never an error the game has to care about
    async fn load(&self) -> StatsResult<AllTimeStats>;

    /// Persist the aggregate. An empty aggregate is a no-op so a fresh
    /// process can never clobber previously saved totals.
    async fn save(&self, stats: &AllTimeStats) -> StatsResult<()>;

    /// Drop the persisted aggregate (host reset)
    async fn clear(&self) -> StatsResult<()>;
}

/// JSON file storage with tmp-file + rename writes
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Move a broken stats file aside so the next save starts clean and the
    /// original bytes stay around for inspection
    async fn quarantine(&self, reason: &str) {
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("stats.json");
        let aside = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            file_name,
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        ));
        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), aside = %aside.display(), reason, "Quarantined corrupt stats file")
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), %e, "Failed to quarantine corrupt stats file")
            }
        }
    }
}

#[async_trait]
impl StatsBackend for FileBackend {
    async fn load(&self) -> StatsResult<AllTimeStats> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AllTimeStats::new());
            }
            Err(e) => return Err(e.into()),
        };

        let stats: AllTimeStats = match serde_json::from_slice(&bytes) {
            Ok(stats) => stats,
            Err(e) => {
                self.quarantine(&e.to_string()).await;
                return Ok(AllTimeStats::new());
            }
        };
        if let Err(reason) = stats.validate() {
            self.quarantine(&reason).await;
            return Ok(AllTimeStats::new());
        }
        Ok(stats)
    }

    async fn save(&self, stats: &AllTimeStats) -> StatsResult<()> {
        if stats.is_empty() {
            tracing::debug!("Skipping save of empty stats");
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(stats)?;
        let tmp = self.path.with_file_name(format!(
            "{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("stats.json")
        ));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> StatsResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryBackend {
    stats: RwLock<AllTimeStats>,
}

#[async_trait]
impl StatsBackend for MemoryBackend {
    async fn load(&self) -> StatsResult<AllTimeStats> {
        Ok(self.stats.read().await.clone())
    }

    async fn save(&self, stats: &AllTimeStats) -> StatsResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        *self.stats.write().await = stats.clone();
        Ok(())
    }

    async fn clear(&self) -> StatsResult<()> {
        *self.stats.write().await = AllTimeStats::new();
        Ok(())
    }
}

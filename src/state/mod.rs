mod player;
mod round;
mod score;

use crate::abuse::{AbuseConfig, AttemptLimiter, ClickLimiter, ConnectionLimits};
use crate::auth::{HostAuthConfig, HostTokenStore};
use crate::botdetect::{BotConfig, BotDetector};
use crate::protocol::ServerMessage;
use crate::session::SessionStore;
use crate::stats::{AllTimeStats, MemoryBackend, StatsBackend};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub game: Arc<RwLock<GameState>>,
    pub config: GameConfig,
    pub sessions: SessionStore,
    pub click_limiter: ClickLimiter,
    pub bot_detector: BotDetector,
    pub conn_limits: Arc<ConnectionLimits>,
    pub login_limiter: AttemptLimiter,
    pub host_auth: HostAuthConfig,
    pub host_tokens: HostTokenStore,
    pub all_time: Arc<RwLock<AllTimeStats>>,
    pub stats_backend: Arc<dyn StatsBackend>,
    /// Broadcast channel for pushing game state to every connection
    pub broadcast: broadcast::Sender<ServerMessage>,
}

impl AppState {
    pub fn new(
        config: GameConfig,
        abuse: AbuseConfig,
        bot: BotConfig,
        host_auth: HostAuthConfig,
        stats_backend: Arc<dyn StatsBackend>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            game: Arc::new(RwLock::new(GameState::new(&config))),
            sessions: SessionStore::new(config.session_grace_secs),
            click_limiter: ClickLimiter::new(abuse.max_clicks_per_sec, Duration::from_secs(1)),
            bot_detector: BotDetector::new(bot),
            conn_limits: Arc::new(ConnectionLimits::new(abuse.max_conns_per_ip)),
            login_limiter: AttemptLimiter::new(
                abuse.login_max_attempts,
                Duration::from_secs(abuse.login_window_secs),
            ),
            host_tokens: HostTokenStore::new(host_auth.token_ttl_hours),
            host_auth,
            all_time: Arc::new(RwLock::new(AllTimeStats::new())),
            stats_backend,
            broadcast: tx,
            config,
        }
    }

    /// State with defaults everywhere and memory-backed stats
    pub fn with_config(config: GameConfig) -> Self {
        Self::new(
            config,
            AbuseConfig::default(),
            BotConfig::default(),
            HostAuthConfig::default(),
            Arc::new(MemoryBackend::default()),
        )
    }

    /// Assemble the broadcast payload for callers already holding the lock.
    /// Mutate-then-broadcast must not release the lock in between, so the
    /// locked variant is the one transitions use.
    pub fn game_state_message_locked(&self, game: &GameState) -> ServerMessage {
        let mut leaderboard = match (game.phase, &game.final_leaderboard) {
            (Phase::Finished, Some(board)) => board.clone(),
            _ => score::basic_leaderboard(game),
        };
        leaderboard.truncate(self.config.leaderboard_size);

        let auction_scores = match game.phase {
            Phase::BonusCountdown | Phase::BonusTap => Some(game.auction_scores.clone()),
            _ => None,
        };
        let bonus_start_time = match game.phase {
            Phase::BonusTap => game.bonus_start_time.map(|t| t.to_rfc3339()),
            _ => None,
        };

        ServerMessage::GameState {
            phase: game.phase,
            time_remaining: game.time_remaining,
            round: game.round,
            player_count: game.connected_count(),
            leaderboard,
            winner: game.winner.clone(),
            winner_ad: game.winner_ad.clone(),
            auction_scores,
            bonus_start_time,
        }
    }

    pub async fn game_state_message(&self) -> ServerMessage {
        let game = self.game.read().await;
        self.game_state_message_locked(&game)
    }

    /// Push the current state to every connection
    pub fn broadcast_state_locked(&self, game: &GameState) {
        let msg = self.game_state_message_locked(game);
        // Send only fails when nobody is connected, which is fine
        let _ = self.broadcast.send(msg);
    }

    pub async fn broadcast_state(&self) {
        let game = self.game.read().await;
        self.broadcast_state_locked(&game);
    }

    /// Wipe the all-time totals, in memory first and then on disk
    pub async fn reset_all_time_stats(&self) {
        *self.all_time.write().await = AllTimeStats::new();
        tracing::info!("All-time stats reset");

        let state = self.clone();
        tokio::spawn(async move {
            if let Err(e) = state.stats_backend.clear().await {
                tracing::error!("Failed to clear persisted stats: {}", e);
            }
        });
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_config(GameConfig::default())
    }
}

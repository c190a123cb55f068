use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type ConnectionId = String;
pub type SessionToken = String;
pub type HostToken = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    AuctionCountdown,
    Auction,
    BonusCountdown,
    BonusTap,
    Finished,
}

impl Phase {
    /// Phases in which a dropped connection keeps its player entry so the
    /// score survives a reconnect
    pub fn retains_disconnected(&self) -> bool {
        matches!(self, Phase::AuctionCountdown | Phase::Auction)
    }
}

/// Palette for auto-assigned player colors
pub const PLAYER_COLORS: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3",
];

/// Duration bounds applied to host-supplied and env-supplied settings
pub const MIN_AUCTION_SECS: u32 = 5;
pub const MAX_AUCTION_SECS: u32 = 600;
pub const MAX_COUNTDOWN_SECS: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub auction_secs: u32,
    pub countdown_secs: u32,
    pub bonus_countdown_secs: u32,
    /// Maximum wait for bonus taps before the round finishes without them
    pub bonus_tap_timeout_secs: u32,
    /// How long a disconnected session stays reclaimable
    pub session_grace_secs: u64,
    pub max_players: usize,
    /// Entries included in broadcast leaderboards
    pub leaderboard_size: usize,
    pub max_name_chars: usize,
    pub max_ad_chars: usize,
    /// Bonus multipliers by reaction-time rank; ranks beyond the list get 1.0
    pub multipliers: Vec<f64>,
    /// Countdown tick length in milliseconds (shortened in tests)
    pub tick_millis: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            auction_secs: 30,
            countdown_secs: 3,
            bonus_countdown_secs: 3,
            bonus_tap_timeout_secs: 10,
            session_grace_secs: 30,
            max_players: 100,
            leaderboard_size: 10,
            max_name_chars: 24,
            max_ad_chars: 120,
            multipliers: vec![2.0, 1.5, 1.25],
            tick_millis: 1000,
        }
    }
}

impl GameConfig {
    /// Load config from environment variables, clamping out-of-range values
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let auction_secs = env_u32("AUCTION_DURATION_SECS", defaults.auction_secs);
        let countdown_secs = env_u32("COUNTDOWN_SECS", defaults.countdown_secs);
        let bonus_countdown_secs = env_u32("BONUS_COUNTDOWN_SECS", defaults.bonus_countdown_secs);
        let bonus_tap_timeout_secs =
            env_u32("BONUS_TAP_TIMEOUT_SECS", defaults.bonus_tap_timeout_secs).max(1);

        let session_grace_secs = std::env::var("SESSION_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.session_grace_secs);

        let max_players = std::env::var("MAX_PLAYERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_players);

        let leaderboard_size = std::env::var("LEADERBOARD_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.leaderboard_size)
            .max(1);

        let config = Self {
            auction_secs: clamp_auction_secs(auction_secs),
            countdown_secs: clamp_countdown_secs(countdown_secs),
            bonus_countdown_secs: clamp_countdown_secs(bonus_countdown_secs),
            bonus_tap_timeout_secs,
            session_grace_secs,
            max_players,
            leaderboard_size,
            ..defaults
        };

        tracing::info!(
            auction_secs = config.auction_secs,
            countdown_secs = config.countdown_secs,
            bonus_tap_timeout_secs = config.bonus_tap_timeout_secs,
            session_grace_secs = config.session_grace_secs,
            max_players = config.max_players,
            "Game config loaded"
        );

        config
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Clamp an auction duration to the allowed range
pub fn clamp_auction_secs(secs: u32) -> u32 {
    secs.clamp(MIN_AUCTION_SECS, MAX_AUCTION_SECS)
}

/// Clamp a countdown duration (zero is allowed and skips the countdown tick)
pub fn clamp_countdown_secs(secs: u32) -> u32 {
    secs.min(MAX_COUNTDOWN_SECS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub name: String,
    pub color: String,
    pub ad_content: Option<String>,
    pub clicks: u32,
    pub suspicious: bool,
    pub suspicion_reason: Option<String>,
    /// Bonus-round reaction time, set at most once per round
    pub reaction_time_ms: Option<u32>,
    /// Round in which the connection dropped; the entry is kept so the score
    /// survives, then pruned at the next round start
    pub disconnected_round: Option<u32>,
    /// Process-wide join counter, used as the deterministic sort tie-break
    pub joined_seq: u64,
}

impl PlayerEntry {
    pub fn new(name: String, color: String, ad_content: Option<String>, joined_seq: u64) -> Self {
        Self {
            name,
            color,
            ad_content,
            clicks: 0,
            suspicious: false,
            suspicion_reason: None,
            reaction_time_ms: None,
            disconnected_round: None,
            joined_seq,
        }
    }

    /// Clear everything a fresh round starts over with
    pub fn reset_for_round(&mut self) {
        self.clicks = 0;
        self.suspicious = false;
        self.suspicion_reason = None;
        self.reaction_time_ms = None;
    }
}

/// One row of a broadcast leaderboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub id: ConnectionId,
    pub name: String,
    pub clicks: u32,
    pub color: String,
    pub suspicious: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_time_ms: Option<u32>,
    pub final_score: u32,
}

/// The single shared round-state record
#[derive(Debug, Clone)]
pub struct GameState {
    pub phase: Phase,
    pub players: HashMap<ConnectionId, PlayerEntry>,
    pub round: u32,
    pub time_remaining: u32,
    pub auction_duration: u32,
    pub countdown_duration: u32,
    pub bonus_countdown_duration: u32,
    /// Click counts snapshotted when the auction ends, stable through the
    /// bonus phases
    pub auction_scores: HashMap<ConnectionId, u32>,
    pub bonus_start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub winner: Option<String>,
    pub winner_ad: Option<String>,
    pub final_leaderboard: Option<Vec<LeaderboardEntry>>,
    /// Bumped under the write lock whenever the live timer lineage changes;
    /// timer tasks re-check their captured epoch before mutating
    pub timer_epoch: u64,
    /// Next value handed out as a player's joined_seq
    pub joined_seq: u64,
}

impl GameState {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            phase: Phase::Waiting,
            players: HashMap::new(),
            round: 0,
            time_remaining: 0,
            auction_duration: config.auction_secs,
            countdown_duration: config.countdown_secs,
            bonus_countdown_duration: config.bonus_countdown_secs,
            auction_scores: HashMap::new(),
            bonus_start_time: None,
            winner: None,
            winner_ad: None,
            final_leaderboard: None,
            timer_epoch: 0,
            joined_seq: 0,
        }
    }

    pub fn next_joined_seq(&mut self) -> u64 {
        let seq = self.joined_seq;
        self.joined_seq += 1;
        seq
    }

    /// Players whose connection is currently open
    pub fn connected_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.disconnected_round.is_none())
            .count()
    }
}

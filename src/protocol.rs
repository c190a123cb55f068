use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame {
        name: Option<String>,
        /// Optional sponsor line shown on the beamer when this player wins
        ad_content: Option<String>,
    },
    RejoinGame {
        token: SessionToken,
    },
    Click,
    // Host-only messages
    StartAuction {
        duration: Option<u32>,
        countdown: Option<u32>,
    },
    ResetAuction,
    ResetAllTimeStats,
    AuthenticateHost {
        token: HostToken,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a successful join; the token is the reconnect credential
    Joined {
        token: SessionToken,
        player: PlayerSummary,
    },
    /// Reply to a successful rejoin
    Rejoined {
        player: PlayerSummary,
    },
    GameState {
        phase: Phase,
        time_remaining: u32,
        round: u32,
        player_count: usize,
        leaderboard: Vec<LeaderboardEntry>,
        winner: Option<String>,
        winner_ad: Option<String>,
        /// Auction-end click snapshot (bonus phases only)
        #[serde(skip_serializing_if = "Option::is_none")]
        auction_scores: Option<HashMap<ConnectionId, u32>>,
        /// Tap-window start, RFC3339 (BONUS_TAP only)
        #[serde(skip_serializing_if = "Option::is_none")]
        bonus_start_time: Option<String>,
    },
    HostAuthenticated,
    Error {
        code: String,
        msg: String,
    },
}

/// Player info echoed back on join/rejoin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub name: String,
    pub color: String,
    pub clicks: u32,
    pub suspicious: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_content: Option<String>,
}

impl From<&PlayerEntry> for PlayerSummary {
    fn from(p: &PlayerEntry) -> Self {
        Self {
            name: p.name.clone(),
            color: p.color.clone(),
            clicks: p.clicks,
            suspicious: p.suspicious,
            ad_content: p.ad_content.clone(),
        }
    }
}

//! Round lifecycle: phase transitions and the timers that drive them.
//!
//! Exactly one timer lineage is live at any moment. Every task captures the
//! `timer_epoch` current when it was armed and re-checks it under the write
//! lock before touching anything; bumping the epoch is how a restart or
//! reset orphans the previous lineage without tracking task handles.

use super::{score, AppState};
use crate::types::*;
use chrono::Utc;
use std::time::Duration;

impl AppState {
    /// Begin a new round. Valid in every phase; starting over mid-round
    /// simply orphans the running timers via the epoch bump.
    pub async fn start_auction(&self, duration: Option<u32>, countdown: Option<u32>) {
        // Fresh round, fresh click histories
        self.bot_detector.clear().await;

        let mut game = self.game.write().await;
        game.timer_epoch += 1;

        if let Some(secs) = duration {
            game.auction_duration = clamp_auction_secs(secs);
        }
        if let Some(secs) = countdown {
            game.countdown_duration = clamp_countdown_secs(secs);
        }

        game.round += 1;
        game.phase = Phase::AuctionCountdown;
        game.time_remaining = game.countdown_duration;
        game.auction_scores.clear();
        game.bonus_start_time = None;
        game.winner = None;
        game.winner_ad = None;
        game.final_leaderboard = None;

        // Entries kept around for reconnects do not carry into a new round
        game.players.retain(|_, p| p.disconnected_round.is_none());
        for player in game.players.values_mut() {
            player.reset_for_round();
        }

        tracing::info!(
            "Starting auction round {} ({}s auction, {}s countdown)",
            game.round,
            game.auction_duration,
            game.countdown_duration
        );

        if game.time_remaining > 0 {
            self.spawn_countdown(game.timer_epoch);
        } else {
            self.advance_phase_locked(&mut game);
        }
        self.broadcast_state_locked(&game);
    }

    /// Abort whatever is running and return to the lobby
    pub async fn reset_auction(&self) {
        self.bot_detector.clear().await;

        let mut game = self.game.write().await;
        game.timer_epoch += 1;
        game.phase = Phase::Waiting;
        game.time_remaining = 0;
        game.auction_scores.clear();
        game.bonus_start_time = None;
        game.winner = None;
        game.winner_ad = None;
        game.final_leaderboard = None;
        game.players.retain(|_, p| p.disconnected_round.is_none());
        for player in game.players.values_mut() {
            player.reset_for_round();
        }

        tracing::info!("Auction reset to lobby");
        self.broadcast_state_locked(&game);
    }

    /// Move to the next phase. Loops so a zero-length countdown falls
    /// straight through instead of idling a full tick at zero.
    pub(crate) fn advance_phase_locked(&self, game: &mut GameState) {
        loop {
            match game.phase {
                Phase::AuctionCountdown => {
                    game.phase = Phase::Auction;
                    game.time_remaining = game.auction_duration;
                    game.timer_epoch += 1;
                    self.spawn_countdown(game.timer_epoch);
                    return;
                }
                Phase::Auction => {
                    // Freeze the auction result; live clicks may be reset
                    // by a cross-round rejoin while the bonus phases run
                    game.auction_scores = game
                        .players
                        .iter()
                        .map(|(id, p)| (id.clone(), p.clicks))
                        .collect();
                    for player in game.players.values_mut() {
                        player.reaction_time_ms = None;
                    }
                    game.phase = Phase::BonusCountdown;
                    game.time_remaining = game.bonus_countdown_duration;
                    game.timer_epoch += 1;
                    if game.time_remaining == 0 {
                        continue;
                    }
                    self.spawn_countdown(game.timer_epoch);
                    return;
                }
                Phase::BonusCountdown => {
                    game.phase = Phase::BonusTap;
                    game.time_remaining = 0;
                    game.bonus_start_time = Some(Utc::now());
                    game.timer_epoch += 1;
                    self.spawn_tap_timeout(game.timer_epoch);
                    return;
                }
                Phase::BonusTap => {
                    self.finish_round_locked(game);
                    return;
                }
                Phase::Waiting | Phase::Finished => return,
            }
        }
    }

    /// Enter Finished: compute the final board, pick the winner, kick off
    /// the stats save. The save is the only suspending side effect and runs
    /// after the in-memory mutation and broadcast are done.
    pub(crate) fn finish_round_locked(&self, game: &mut GameState) {
        game.timer_epoch += 1;
        game.phase = Phase::Finished;
        game.time_remaining = 0;

        let board = score::final_scores(game, &self.config.multipliers);
        let winner = score::determine_winner(&board).cloned();
        let winner_ad = winner
            .as_ref()
            .and_then(|w| game.players.get(&w.id))
            .and_then(|p| p.ad_content.clone());
        game.winner = winner.map(|w| w.name);
        game.winner_ad = winner_ad;
        game.final_leaderboard = Some(board.clone());

        tracing::info!(
            "Round {} finished, winner: {}",
            game.round,
            game.winner.as_deref().unwrap_or("nobody")
        );

        let winner_name = game.winner.clone();
        let round = game.round;
        let state = self.clone();
        tokio::spawn(async move {
            let snapshot = {
                let mut all_time = state.all_time.write().await;
                all_time.record_round(&board, winner_name.as_deref());
                all_time.clone()
            };
            if let Err(e) = state.stats_backend.save(&snapshot).await {
                // Not fatal; the next round end saves the same totals again
                tracing::error!("Failed to save all-time stats after round {}: {}", round, e);
            }
        });
    }

    /// Tick `time_remaining` down once per tick interval until it hits zero,
    /// then advance. Exits silently as soon as the epoch moved on.
    fn spawn_countdown(&self, epoch: u64) {
        let state = self.clone();
        let tick = Duration::from_millis(self.config.tick_millis);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let mut game = state.game.write().await;
                if game.timer_epoch != epoch {
                    return;
                }
                game.time_remaining = game.time_remaining.saturating_sub(1);
                if game.time_remaining == 0 {
                    state.advance_phase_locked(&mut game);
                    state.broadcast_state_locked(&game);
                    return;
                }
                state.broadcast_state_locked(&game);
            }
        });
    }

    /// Hard stop for the tap phase so a round with stragglers still ends
    fn spawn_tap_timeout(&self, epoch: u64) {
        let state = self.clone();
        let timeout = Duration::from_millis(
            u64::from(self.config.bonus_tap_timeout_secs) * self.config.tick_millis,
        );
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut game = state.game.write().await;
            if game.timer_epoch != epoch || game.phase != Phase::BonusTap {
                return;
            }
            tracing::debug!("Bonus tap window elapsed for round {}", game.round);
            state.finish_round_locked(&mut game);
            state.broadcast_state_locked(&game);
        });
    }
}

//! Periodic cleanup of per-connection tracking state.
//!
//! Disconnects already tear down their own limiter window and click history,
//! but sessions expire on wall-clock time and host tokens outlive any single
//! connection, so a background sweep keeps the maps bounded over a long
//! evening.

use crate::state::AppState;
use std::collections::HashSet;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn the background sweep task
pub fn spawn_janitor(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // First tick fires immediately, skip it
        interval.tick().await;

        loop {
            interval.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &AppState) {
    let swept = state.sessions.sweep_expired().await;
    if !swept.is_empty() {
        tracing::info!("Swept {} expired sessions", swept.len());
    }

    let dropped = state.host_tokens.sweep_expired().await;
    if dropped > 0 {
        tracing::info!("Swept {} expired host tokens", dropped);
    }

    state.login_limiter.cleanup().await;

    // Tracking entries can only accumulate for connected players; anything
    // else is leftover from a connection that never said goodbye
    let active: HashSet<String> = {
        let game = state.game.read().await;
        game.players
            .iter()
            .filter(|(_, p)| p.disconnected_round.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    };
    state.click_limiter.retain(&active).await;
    state.bot_detector.retain(&active).await;
}

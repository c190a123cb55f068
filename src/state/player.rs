use super::AppState;
use crate::protocol::PlayerSummary;
use crate::session::{RejoinError, RestoredSession};
use crate::types::*;
use rand::Rng;
use std::collections::HashSet;
use std::time::Instant;

/// Keep at most this many characters of client-supplied text
fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn random_name() -> String {
    petname::petname(2, "-").unwrap_or_else(|| "anonymous-axolotl".to_string())
}

/// Prefer a palette color nobody is wearing yet
fn pick_color(game: &GameState) -> String {
    let used: HashSet<&str> = game.players.values().map(|p| p.color.as_str()).collect();
    let free: Vec<&str> = PLAYER_COLORS
        .iter()
        .copied()
        .filter(|c| !used.contains(c))
        .collect();
    let pool = if free.is_empty() { PLAYER_COLORS } else { &free[..] };

    let mut rng = rand::rng();
    pool[rng.random_range(0..pool.len())].to_string()
}

impl AppState {
    /// Register a new player on this connection. Joining is allowed in every
    /// phase; a mid-auction joiner simply starts at zero clicks.
    pub async fn join_game(
        &self,
        connection_id: &str,
        name: Option<String>,
        ad_content: Option<String>,
    ) -> Result<(SessionToken, PlayerSummary), String> {
        let mut game = self.game.write().await;
        if game.connected_count() >= self.config.max_players {
            return Err("Game is full".to_string());
        }

        let name = name
            .map(|n| truncate(n.trim(), self.config.max_name_chars))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(random_name);
        let ad_content = ad_content
            .map(|a| truncate(a.trim(), self.config.max_ad_chars))
            .filter(|a| !a.is_empty());

        let seq = game.next_joined_seq();
        let color = pick_color(&game);
        let player = PlayerEntry::new(name, color, ad_content, seq);
        game.players
            .insert(connection_id.to_string(), player.clone());

        tracing::info!("Player '{}' joined ({} connected)", player.name, game.connected_count());
        self.broadcast_state_locked(&game);
        let round = game.round;
        drop(game);

        // The session store takes its own lock and never touches the game
        // lock, so this ordering is one-way
        let token = self.sessions.create(connection_id, &player, round).await;
        Ok((token, PlayerSummary::from(&player)))
    }

    /// Reclaim a session after a disconnect. Same-round rejoins keep their
    /// clicks; cross-round rejoins keep only their identity.
    pub async fn rejoin_game(
        &self,
        connection_id: &str,
        token: &str,
    ) -> Result<PlayerSummary, RejoinError> {
        let restored = self.sessions.restore(token, connection_id).await?;
        let RestoredSession {
            player: cached,
            round: session_round,
            stale_connection_id,
        } = restored;

        let mut game = self.game.write().await;

        // The entry retained under the old connection id (if any) moves out
        // of the way; its auction-snapshot score follows the player
        if let Some(stale) = &stale_connection_id {
            game.players.remove(stale);
            if let Some(score) = game.auction_scores.remove(stale) {
                game.auction_scores.insert(connection_id.to_string(), score);
            }
        }

        let mut player = cached;
        player.disconnected_round = None;
        if session_round != game.round {
            // Stale score must not leak into a round it wasn't earned in
            player.reset_for_round();
        }

        game.players
            .insert(connection_id.to_string(), player.clone());
        tracing::info!("Player '{}' rejoined ({} connected)", player.name, game.connected_count());
        self.broadcast_state_locked(&game);

        Ok(PlayerSummary::from(&player))
    }

    /// Route a click by phase: auction clicks bid, bonus taps record a
    /// reaction time, anything else is dropped. Returns whether the click
    /// changed any state.
    pub async fn handle_click(&self, connection_id: &str, now: Instant) -> bool {
        let mut game = self.game.write().await;
        match game.phase {
            Phase::Auction => {
                match game.players.get(connection_id) {
                    Some(p) if p.disconnected_round.is_none() => {}
                    _ => return false,
                }

                if !self.click_limiter.check(connection_id, now).await {
                    tracing::debug!("Click from {} dropped by rate limiter", connection_id);
                    return false;
                }
                self.bot_detector.note_click(connection_id, now).await;

                let already_suspicious = game
                    .players
                    .get(connection_id)
                    .map(|p| p.suspicious)
                    .unwrap_or(false);
                // The flag is sticky until the next round reset
                let verdict = if already_suspicious {
                    None
                } else {
                    Some(self.bot_detector.classify(connection_id).await)
                };

                let Some(player) = game.players.get_mut(connection_id) else {
                    return false;
                };
                player.clicks += 1;
                if let Some(verdict) = verdict {
                    if verdict.suspicious {
                        tracing::info!(
                            "Player '{}' flagged as suspicious: {}",
                            player.name,
                            verdict.reason.as_deref().unwrap_or("unknown")
                        );
                        player.suspicious = true;
                        player.suspicion_reason = verdict.reason;
                    }
                }

                self.broadcast_state_locked(&game);
                true
            }
            Phase::BonusTap => {
                let Some(start) = game.bonus_start_time else {
                    return false;
                };
                let elapsed_ms = (chrono::Utc::now() - start).num_milliseconds();
                if elapsed_ms < 0 {
                    return false;
                }
                let reaction = u32::try_from(elapsed_ms).unwrap_or(u32::MAX);

                match game.players.get_mut(connection_id) {
                    Some(p) if p.disconnected_round.is_none() && p.reaction_time_ms.is_none() => {
                        p.reaction_time_ms = Some(reaction);
                    }
                    // Unknown connection, or this player already tapped
                    _ => return false,
                }

                let everyone_tapped = game.connected_count() > 0
                    && game
                        .players
                        .values()
                        .filter(|p| p.disconnected_round.is_none())
                        .all(|p| p.reaction_time_ms.is_some());
                if everyone_tapped {
                    self.finish_round_locked(&mut game);
                }

                self.broadcast_state_locked(&game);
                true
            }
            _ => false,
        }
    }

    /// Transport-level disconnect. During a countdown or running auction the
    /// entry stays so the score survives a reconnect; otherwise it goes
    /// immediately. Either way the session becomes reclaimable.
    pub async fn handle_disconnect(&self, connection_id: &str) {
        let mut game = self.game.write().await;
        let round = game.round;

        let snapshot = if game.phase.retains_disconnected() {
            match game.players.get_mut(connection_id) {
                Some(player) => {
                    player.disconnected_round = Some(round);
                    Some(player.clone())
                }
                None => None,
            }
        } else {
            game.players.remove(connection_id)
        };

        if let Some(ref player) = snapshot {
            tracing::info!(
                "Player '{}' disconnected ({} connected)",
                player.name,
                game.connected_count()
            );
            self.broadcast_state_locked(&game);
        }
        drop(game);

        if let Some(snapshot) = snapshot {
            self.sessions
                .mark_disconnected(connection_id, Some(snapshot), round)
                .await;
        }
        // Limiter windows and click histories are connection-scoped
        self.click_limiter.cleanup(connection_id).await;
        self.bot_detector.reset(connection_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn join(state: &AppState, conn: &str, name: &str) -> SessionToken {
        let (token, _) = state
            .join_game(conn, Some(name.to_string()), None)
            .await
            .unwrap();
        token
    }

    async fn enter_auction(state: &AppState) {
        let mut game = state.game.write().await;
        game.phase = Phase::Auction;
        game.round = game.round.max(1);
        game.time_remaining = 30;
    }

    async fn enter_bonus_tap(state: &AppState) {
        let mut game = state.game.write().await;
        game.phase = Phase::BonusTap;
        game.bonus_start_time = Some(chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_join_assigns_identity() {
        let state = AppState::default();
        let (token, summary) = state
            .join_game("conn-1", Some("  Alice  ".to_string()), None)
            .await
            .unwrap();

        assert_eq!(summary.name, "Alice");
        assert_eq!(token.len(), 32);
        assert!(PLAYER_COLORS.contains(&summary.color.as_str()));

        let game = state.game.read().await;
        assert_eq!(game.players["conn-1"].name, "Alice");
        assert_eq!(game.players["conn-1"].clicks, 0);
    }

    #[tokio::test]
    async fn test_join_generates_name_when_missing() {
        let state = AppState::default();
        let (_, summary) = state.join_game("conn-1", None, None).await.unwrap();
        assert!(!summary.name.is_empty());

        let (_, summary) = state
            .join_game("conn-2", Some("   ".to_string()), None)
            .await
            .unwrap();
        assert!(!summary.name.trim().is_empty());
    }

    #[tokio::test]
    async fn test_join_truncates_name_and_ad() {
        let state = AppState::default();
        let long_name = "x".repeat(100);
        let long_ad = "y".repeat(500);
        let (_, summary) = state
            .join_game("conn-1", Some(long_name), Some(long_ad))
            .await
            .unwrap();

        let config = GameConfig::default();
        assert_eq!(summary.name.chars().count(), config.max_name_chars);
        assert_eq!(
            summary.ad_content.unwrap().chars().count(),
            config.max_ad_chars
        );
    }

    #[tokio::test]
    async fn test_join_rejects_when_full() {
        let mut config = GameConfig::default();
        config.max_players = 2;
        let state = AppState::with_config(config);

        join(&state, "conn-1", "a").await;
        join(&state, "conn-2", "b").await;
        let result = state.join_game("conn-3", Some("c".to_string()), None).await;
        assert!(result.unwrap_err().contains("full"));
    }

    #[tokio::test]
    async fn test_click_counts_only_in_auction() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;

        assert!(!state.handle_click("conn-1", Instant::now()).await);
        assert_eq!(state.game.read().await.players["conn-1"].clicks, 0);

        enter_auction(&state).await;
        assert!(state.handle_click("conn-1", Instant::now()).await);
        assert_eq!(state.game.read().await.players["conn-1"].clicks, 1);
    }

    #[tokio::test]
    async fn test_click_from_unknown_connection_is_ignored() {
        let state = AppState::default();
        enter_auction(&state).await;
        assert!(!state.handle_click("nobody", Instant::now()).await);
    }

    #[tokio::test]
    async fn test_clicks_beyond_rate_cap_are_dropped() {
        let mut abuse = crate::abuse::AbuseConfig::default();
        abuse.max_clicks_per_sec = 3;
        let state = AppState::new(
            GameConfig::default(),
            abuse,
            crate::botdetect::BotConfig::default(),
            crate::auth::HostAuthConfig::default(),
            std::sync::Arc::new(crate::stats::MemoryBackend::default()),
        );
        join(&state, "conn-1", "alice").await;
        enter_auction(&state).await;

        let now = Instant::now();
        for _ in 0..5 {
            state.handle_click("conn-1", now).await;
        }
        assert_eq!(state.game.read().await.players["conn-1"].clicks, 3);
    }

    #[tokio::test]
    async fn test_metronome_clicker_gets_flagged() {
        let state = AppState::default();
        join(&state, "conn-1", "robo").await;
        enter_auction(&state).await;

        // Perfectly even 100ms spacing: 10 clicks/s stays under the rate
        // cap but the zero-jitter pattern trips the analyzer
        let t0 = Instant::now();
        for i in 0..12u64 {
            state
                .handle_click("conn-1", t0 + Duration::from_millis(i * 100))
                .await;
        }

        let game = state.game.read().await;
        let player = &game.players["conn-1"];
        assert_eq!(player.clicks, 12);
        assert!(player.suspicious);
        assert!(player
            .suspicion_reason
            .as_deref()
            .unwrap()
            .contains("too regular"));
    }

    #[tokio::test]
    async fn test_jittery_clicker_not_flagged() {
        let state = AppState::default();
        join(&state, "conn-1", "human").await;
        enter_auction(&state).await;

        let t0 = Instant::now();
        let mut t = t0;
        for i in 0..14u64 {
            let gap = if i % 2 == 0 { 80 } else { 240 };
            t += Duration::from_millis(gap);
            state.handle_click("conn-1", t).await;
        }

        let game = state.game.read().await;
        assert!(!game.players["conn-1"].suspicious);
    }

    #[tokio::test]
    async fn test_tap_records_reaction_once() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;
        join(&state, "conn-2", "bob").await;
        enter_bonus_tap(&state).await;

        assert!(state.handle_click("conn-1", Instant::now()).await);
        let first = state.game.read().await.players["conn-1"].reaction_time_ms;
        assert!(first.is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Second tap is a no-op
        assert!(!state.handle_click("conn-1", Instant::now()).await);
        let second = state.game.read().await.players["conn-1"].reaction_time_ms;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_tap_without_start_time_is_ignored() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;
        {
            let mut game = state.game.write().await;
            game.phase = Phase::BonusTap;
            game.bonus_start_time = None;
        }
        assert!(!state.handle_click("conn-1", Instant::now()).await);
    }

    #[tokio::test]
    async fn test_round_finishes_when_everyone_tapped() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;
        join(&state, "conn-2", "bob").await;
        {
            let mut game = state.game.write().await;
            game.phase = Phase::BonusTap;
            game.bonus_start_time = Some(chrono::Utc::now());
            game.auction_scores =
                std::collections::HashMap::from([("conn-1".to_string(), 10), ("conn-2".to_string(), 3)]);
        }

        state.handle_click("conn-1", Instant::now()).await;
        assert_eq!(state.game.read().await.phase, Phase::BonusTap);

        tokio::time::sleep(Duration::from_millis(5)).await;
        state.handle_click("conn-2", Instant::now()).await;

        let game = state.game.read().await;
        assert_eq!(game.phase, Phase::Finished);
        // First tapper doubles, second gets 1.5x
        assert_eq!(game.winner.as_deref(), Some("alice"));
        let board = game.final_leaderboard.as_ref().unwrap();
        assert_eq!(board[0].final_score, 20);
        assert_eq!(board[1].final_score, 5);
    }

    #[tokio::test]
    async fn test_disconnect_mid_auction_retains_entry() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;
        enter_auction(&state).await;
        for _ in 0..3 {
            state.handle_click("conn-1", Instant::now()).await;
        }

        state.handle_disconnect("conn-1").await;

        let game = state.game.read().await;
        let player = &game.players["conn-1"];
        assert_eq!(player.disconnected_round, Some(1));
        assert_eq!(player.clicks, 3);
        assert_eq!(game.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_outside_round_removes_entry() {
        let state = AppState::default();
        join(&state, "conn-1", "alice").await;

        state.handle_disconnect("conn-1").await;
        assert!(state.game.read().await.players.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_same_round_preserves_clicks() {
        let state = AppState::default();
        let token = join(&state, "conn-1", "alice").await;
        enter_auction(&state).await;
        let now = Instant::now();
        for i in 0..3u64 {
            state
                .handle_click("conn-1", now + Duration::from_millis(i * 200))
                .await;
        }

        state.handle_disconnect("conn-1").await;
        let summary = state.rejoin_game("conn-9", &token).await.unwrap();

        assert_eq!(summary.name, "alice");
        assert_eq!(summary.clicks, 3);
        let game = state.game.read().await;
        assert!(!game.players.contains_key("conn-1"));
        let player = &game.players["conn-9"];
        assert_eq!(player.clicks, 3);
        assert!(player.disconnected_round.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_after_new_round_keeps_identity_not_score() {
        let state = AppState::default();
        let token = join(&state, "conn-1", "alice").await;
        enter_auction(&state).await;
        state.handle_click("conn-1", Instant::now()).await;
        state.handle_disconnect("conn-1").await;

        {
            // A new round started while alice was away
            let mut game = state.game.write().await;
            game.round += 1;
        }

        let summary = state.rejoin_game("conn-9", &token).await.unwrap();
        assert_eq!(summary.name, "alice");
        assert_eq!(summary.clicks, 0);
    }

    #[tokio::test]
    async fn test_rejoin_relocates_auction_snapshot() {
        let state = AppState::default();
        let token = join(&state, "conn-1", "alice").await;
        enter_auction(&state).await;
        for i in 0..5u64 {
            state
                .handle_click("conn-1", Instant::now() + Duration::from_millis(i * 150))
                .await;
        }
        state.handle_disconnect("conn-1").await;

        {
            // Auction ends while alice is away
            let mut game = state.game.write().await;
            state.advance_phase_locked(&mut game);
            assert_eq!(game.auction_scores["conn-1"], 5);
        }

        state.rejoin_game("conn-9", &token).await.unwrap();

        let game = state.game.read().await;
        assert!(!game.auction_scores.contains_key("conn-1"));
        assert_eq!(game.auction_scores["conn-9"], 5);
    }

    #[tokio::test]
    async fn test_rejoin_with_bad_tokens() {
        let state = AppState::default();
        let token = join(&state, "conn-1", "alice").await;

        // Malformed token shape
        assert_eq!(
            state.rejoin_game("conn-9", "zzz").await.unwrap_err(),
            RejoinError::InvalidToken
        );
        // Well-formed but unknown
        assert_eq!(
            state
                .rejoin_game("conn-9", &"a".repeat(32))
                .await
                .unwrap_err(),
            RejoinError::Expired
        );
        // Still bound to the live connection
        assert_eq!(
            state.rejoin_game("conn-9", &token).await.unwrap_err(),
            RejoinError::InUse
        );
    }
}

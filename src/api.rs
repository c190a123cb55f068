//! HTTP API endpoints.
//!
//! The beamer's idle screen polls the all-time leaderboard here; everything
//! game-related goes over the WebSocket.

use axum::{extract::State, Json};

use crate::state::AppState;
use crate::stats::AllTimeStats;

/// All-time stats snapshot.
///
/// GET /api/stats
pub async fn get_all_time_stats(State(state): State<AppState>) -> Json<AllTimeStats> {
    let stats = state.all_time.read().await.clone();
    Json(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LeaderboardEntry;

    #[tokio::test]
    async fn test_stats_endpoint_returns_current_totals() {
        let state = AppState::default();
        {
            let mut all_time = state.all_time.write().await;
            all_time.record_round(
                &[LeaderboardEntry {
                    id: "conn-1".to_string(),
                    name: "alice".to_string(),
                    clicks: 10,
                    color: "#e6194b".to_string(),
                    suspicious: false,
                    reaction_time_ms: Some(120),
                    final_score: 20,
                }],
                Some("alice"),
            );
        }

        let Json(stats) = get_all_time_stats(State(state)).await;
        assert_eq!(stats.total_rounds, 1);
        assert_eq!(stats.players["alice"].wins, 1);
    }
}

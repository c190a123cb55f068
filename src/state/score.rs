//! Leaderboard and final-score computation.
//!
//! Pure functions over a `GameState` snapshot so they can be called from
//! broadcast assembly and from the Finished transition without re-locking.

use crate::types::*;
use std::cmp::Ordering;

/// Leaderboard during the auction: click counts, highest first.
/// Ties resolve by join order so repeated sorts are stable.
pub fn basic_leaderboard(state: &GameState) -> Vec<LeaderboardEntry> {
    let mut players: Vec<(&ConnectionId, &PlayerEntry)> = state.players.iter().collect();
    players.sort_by(|a, b| {
        b.1.clicks
            .cmp(&a.1.clicks)
            .then(a.1.joined_seq.cmp(&b.1.joined_seq))
    });

    players
        .into_iter()
        .map(|(id, p)| LeaderboardEntry {
            id: id.clone(),
            name: p.name.clone(),
            clicks: p.clicks,
            color: p.color.clone(),
            suspicious: p.suspicious,
            reaction_time_ms: p.reaction_time_ms,
            final_score: p.clicks,
        })
        .collect()
}

/// Final leaderboard: auction clicks boosted by reaction-time multipliers.
///
/// Base score is the auction-end snapshot (falling back to live clicks for
/// players that joined after the snapshot). Players are ranked by reaction
/// time, fastest first and non-tappers last; the rank indexes into the
/// multiplier list and anyone past the list or without a tap gets 1.0.
pub fn final_scores(state: &GameState, multipliers: &[f64]) -> Vec<LeaderboardEntry> {
    let mut by_reaction: Vec<(&ConnectionId, &PlayerEntry)> = state.players.iter().collect();
    by_reaction.sort_by(|a, b| match (a.1.reaction_time_ms, b.1.reaction_time_ms) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.1.joined_seq.cmp(&b.1.joined_seq)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.1.joined_seq.cmp(&b.1.joined_seq),
    });

    let mut entries: Vec<(u64, LeaderboardEntry)> = Vec::with_capacity(by_reaction.len());
    for (rank, (id, p)) in by_reaction.into_iter().enumerate() {
        let base = state.auction_scores.get(id).copied().unwrap_or(p.clicks);
        let multiplier = match p.reaction_time_ms {
            Some(_) => multipliers.get(rank).copied().unwrap_or(1.0),
            None => 1.0,
        };
        let final_score = (base as f64 * multiplier).round() as u32;
        entries.push((
            p.joined_seq,
            LeaderboardEntry {
                id: id.clone(),
                name: p.name.clone(),
                clicks: base,
                color: p.color.clone(),
                suspicious: p.suspicious,
                reaction_time_ms: p.reaction_time_ms,
                final_score,
            },
        ));
    }

    entries.sort_by(|a, b| {
        b.1.final_score
            .cmp(&a.1.final_score)
            .then(a.0.cmp(&b.0))
    });
    entries.into_iter().map(|(_, e)| e).collect()
}

/// The winner is the top entry, but only with a score actually on the board.
/// An all-zero round has no winner.
pub fn determine_winner(final_board: &[LeaderboardEntry]) -> Option<&LeaderboardEntry> {
    final_board.first().filter(|e| e.final_score > 0)
}

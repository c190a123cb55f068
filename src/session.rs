//! Reconnection sessions.
//!
//! Every join hands the client an opaque token. Phone screens lock and WiFi
//! drops mid-auction, so a dropped connection gets a grace period during
//! which the token restores the player, clicks included. Unclaimed sessions
//! are swept after the grace period.

use crate::types::{ConnectionId, PlayerEntry, SessionToken};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const TOKEN_BYTES: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum RejoinError {
    #[error("malformed session token")]
    InvalidToken,
    #[error("session expired or unknown")]
    Expired,
    #[error("session already has a live connection")]
    InUse,
}

#[derive(Debug, Clone)]
struct Session {
    /// Live connection currently bound to this session, if any
    connection_id: Option<ConnectionId>,
    /// Player snapshot, refreshed when the connection drops
    cached_player: PlayerEntry,
    /// Round the snapshot belongs to
    round: u32,
    disconnected_at: Option<DateTime<Utc>>,
    /// Key the player entry had at disconnect time, so a retained in-round
    /// entry can be moved to the new connection on restore
    stale_connection_id: Option<ConnectionId>,
}

/// What a successful restore hands back to the state layer
#[derive(Debug, Clone)]
pub struct RestoredSession {
    pub player: PlayerEntry,
    pub round: u32,
    pub stale_connection_id: Option<ConnectionId>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionToken, Session>>>,
    grace: Duration,
}

impl SessionStore {
    pub fn new(grace_secs: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            grace: Duration::seconds(grace_secs as i64),
        }
    }

    /// Create a session for a freshly joined player and return its token
    pub async fn create(
        &self,
        connection_id: &str,
        player: &PlayerEntry,
        round: u32,
    ) -> SessionToken {
        let mut sessions = self.sessions.write().await;
        let token = loop {
            let candidate = generate_token();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            // Collision - try again
        };

        sessions.insert(
            token.clone(),
            Session {
                connection_id: Some(connection_id.to_string()),
                cached_player: player.clone(),
                round,
                disconnected_at: None,
                stale_connection_id: None,
            },
        );
        token
    }

    /// Unbind the session owned by this connection and start its grace
    /// period. The snapshot replaces the cached player so clicks earned
    /// since join survive. Returns the token for logging.
    pub async fn mark_disconnected(
        &self,
        connection_id: &str,
        snapshot: Option<PlayerEntry>,
        round: u32,
    ) -> Option<SessionToken> {
        let mut sessions = self.sessions.write().await;
        let (token, session) = sessions
            .iter_mut()
            .find(|(_, s)| s.connection_id.as_deref() == Some(connection_id))?;

        session.connection_id = None;
        session.disconnected_at = Some(Utc::now());
        session.stale_connection_id = Some(connection_id.to_string());
        session.round = round;
        if let Some(player) = snapshot {
            session.cached_player = player;
        }
        Some(token.clone())
    }

    /// Bind a disconnected session to a new connection.
    pub async fn restore(
        &self,
        token: &str,
        new_connection_id: &str,
    ) -> Result<RestoredSession, RejoinError> {
        if !is_well_formed(token) {
            return Err(RejoinError::InvalidToken);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(token).ok_or(RejoinError::Expired)?;

        if session.connection_id.is_some() {
            return Err(RejoinError::InUse);
        }
        let expired = session
            .disconnected_at
            .is_some_and(|at| at + self.grace <= Utc::now());
        if expired {
            sessions.remove(token);
            return Err(RejoinError::Expired);
        }

        session.connection_id = Some(new_connection_id.to_string());
        session.disconnected_at = None;
        let stale_connection_id = session.stale_connection_id.take();

        Ok(RestoredSession {
            player: session.cached_player.clone(),
            round: session.round,
            stale_connection_id,
        })
    }

    /// Peek at the player snapshot behind a token without binding anything
    pub async fn get_by_token(&self, token: &str) -> Option<PlayerEntry> {
        let sessions = self.sessions.read().await;
        sessions.get(token).map(|s| s.cached_player.clone())
    }

    /// Remove sessions whose grace period ran out, returning their tokens
    pub async fn sweep_expired(&self) -> Vec<SessionToken> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionToken> = sessions
            .iter()
            .filter(|(_, s)| s.disconnected_at.is_some_and(|at| at + self.grace <= now))
            .map(|(token, _)| token.clone())
            .collect();
        for token in &expired {
            sessions.remove(token);
        }
        expired
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn generate_token() -> SessionToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}

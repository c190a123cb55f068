//! Host authentication: PIN login over HTTP, bearer tokens over WebSocket
//!
//! The host browser POSTs the operator PIN once and receives a token; the
//! WebSocket side presents that token to mark its connection host-privileged.
//! Tokens expire after a TTL and privileges never survive a reconnect.

use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct HostAuthConfig {
    /// Host PIN (None = auth disabled)
    pub pin: Option<String>,
    /// Lifetime of issued host tokens
    pub token_ttl_hours: i64,
}

impl Default for HostAuthConfig {
    fn default() -> Self {
        Self {
            pin: None,
            token_ttl_hours: 24,
        }
    }
}

impl HostAuthConfig {
    /// Load auth config from environment variables
    pub fn from_env() -> Self {
        let pin = std::env::var("HOST_PIN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let token_ttl_hours = std::env::var("HOST_TOKEN_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        if pin.is_some() {
            tracing::info!("Host authentication enabled");
        } else {
            tracing::warn!("Host authentication DISABLED - anyone can claim the host role!");
        }

        Self {
            pin,
            token_ttl_hours,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pin.is_some()
    }

    /// Validate a PIN attempt
    pub fn verify_pin(&self, pin: &str) -> bool {
        match &self.pin {
            // Constant-time comparison to prevent timing attacks
            Some(expected) => constant_time_eq(expected.as_bytes(), pin.as_bytes()),
            None => true, // Auth disabled, allow all
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Issued host tokens and their expiry times
#[derive(Debug, Clone)]
pub struct HostTokenStore {
    tokens: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    ttl: Duration,
}

impl HostTokenStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Mint a fresh token, returning it with its expiry
    pub async fn issue(&self) -> (String, DateTime<Utc>) {
        let token = ulid::Ulid::new().to_string();
        let expires_at = Utc::now() + self.ttl;
        self.tokens.write().await.insert(token.clone(), expires_at);
        (token, expires_at)
    }

    /// True if the token exists and has not expired. Expired tokens are
    /// removed on the spot.
    pub async fn verify(&self, token: &str) -> bool {
        let mut tokens = self.tokens.write().await;
        match tokens.get(token) {
            Some(expires_at) if *expires_at > Utc::now() => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    /// Remove expired tokens, returning how many were dropped
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, expires_at| *expires_at > now);
        before - tokens.len()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub pin: String,
}

/// POST /auth/host - exchange the operator PIN for a host token
pub async fn host_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let ip = addr.ip().to_string();

    if !state.login_limiter.check(&ip).await {
        tracing::warn!(ip, "Host login rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many attempts, slow down" })),
        )
            .into_response();
    }

    if !state.host_auth.verify_pin(&body.pin) {
        tracing::warn!(ip, "Host login with wrong PIN");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Wrong PIN" })),
        )
            .into_response();
    }

    let (token, expires_at) = state.host_tokens.issue().await;
    tracing::info!(ip, "Host token issued");
    (
        StatusCode::OK,
        Json(json!({ "token": token, "expires_at": expires_at.to_rfc3339() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_verify_pin() {
        let config = HostAuthConfig {
            pin: Some("1234".to_string()),
            token_ttl_hours: 24,
        };
        assert!(config.is_enabled());
        assert!(config.verify_pin("1234"));
        assert!(!config.verify_pin("4321"));
        assert!(!config.verify_pin(""));
        assert!(!config.verify_pin("12345"));
    }

    #[test]
    fn test_verify_pin_disabled_allows_all() {
        let config = HostAuthConfig {
            pin: None,
            token_ttl_hours: 24,
        };
        assert!(!config.is_enabled());
        assert!(config.verify_pin("anything"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("HOST_PIN", "  4242  ");
        let config = HostAuthConfig::from_env();
        assert_eq!(config.pin.as_deref(), Some("4242"));
        assert_eq!(config.token_ttl_hours, 24);

        std::env::set_var("HOST_PIN", "");
        let config = HostAuthConfig::from_env();
        assert!(config.pin.is_none());
        std::env::remove_var("HOST_PIN");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[tokio::test]
    async fn test_token_issue_and_verify() {
        let store = HostTokenStore::new(24);
        let (token, expires_at) = store.issue().await;
        assert!(expires_at > Utc::now());
        assert!(store.verify(&token).await);
        assert!(!store.verify("not-a-token").await);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let store = HostTokenStore::new(0);
        let (token, _) = store.issue().await;
        assert!(!store.verify(&token).await);
        // Removed on the failed verify
        assert_eq!(store.sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_expired_tokens() {
        let store = HostTokenStore::new(0);
        store.issue().await;
        store.issue().await;
        assert_eq!(store.sweep_expired().await, 2);
    }
}

//! Anti-abuse controls for surviving a rowdy party crowd
//!
//! - Sliding-window click cap per connection (ceiling for auto-clickers)
//! - Concurrent-connection cap per IP (generous, venues NAT whole rooms)
//! - Fixed-window attempt limiter for host PIN logins

use crate::types::ConnectionId;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    net::IpAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Per-connection click cap over a rolling window
#[derive(Debug, Clone)]
pub struct ClickLimiter {
    /// Map of connection id to click timestamps inside the window
    windows: Arc<RwLock<HashMap<ConnectionId, VecDeque<Instant>>>>,
    /// Maximum clicks per window
    max_per_window: u32,
    /// Rolling window length
    window: Duration,
}

impl Default for ClickLimiter {
    fn default() -> Self {
        Self::new(15, Duration::from_secs(1)) // 15 clicks per rolling second
    }
}

impl ClickLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            max_per_window,
            window,
        }
    }

    /// Check if a click should be counted. Returns true if allowed (the
    /// click is recorded), false if the connection is over its cap (nothing
    /// is recorded). `now` is passed in so tests stay deterministic.
    pub async fn check(&self, id: &str, now: Instant) -> bool {
        let mut windows = self.windows.write().await;
        let window = windows.entry(id.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.max_per_window {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop one connection's window (on disconnect)
    pub async fn cleanup(&self, id: &str) {
        self.windows.write().await.remove(id);
    }

    /// Evict windows for connections no longer alive (call periodically)
    pub async fn retain(&self, active: &HashSet<ConnectionId>) {
        self.windows.write().await.retain(|id, _| active.contains(id));
    }
}

/// Concurrent-connection counting per client IP. Slots are released through
/// the returned guard so an early socket drop can never leak a count.
#[derive(Debug)]
pub struct ConnectionLimits {
    per_ip: Mutex<HashMap<IpAddr, u32>>,
    max_per_ip: u32,
}

impl ConnectionLimits {
    pub fn new(max_per_ip: u32) -> Self {
        Self {
            per_ip: Mutex::new(HashMap::new()),
            max_per_ip,
        }
    }

    /// Take a slot for this IP, or None when the IP is at its cap
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Option<IpSlot> {
        let mut per_ip = self.lock_counts();
        let count = per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return None;
        }
        *count += 1;
        drop(per_ip);
        Some(IpSlot {
            limits: Arc::clone(self),
            ip,
        })
    }

    fn lock_counts(&self) -> std::sync::MutexGuard<'_, HashMap<IpAddr, u32>> {
        match self.per_ip.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// RAII guard for one connection's slot in the per-IP count
#[derive(Debug)]
pub struct IpSlot {
    limits: Arc<ConnectionLimits>,
    ip: IpAddr,
}

impl Drop for IpSlot {
    fn drop(&mut self) {
        let mut per_ip = self.limits.lock_counts();
        if let Some(count) = per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_ip.remove(&self.ip);
            }
        }
    }
}

/// Fixed-window attempt limiter, keyed by caller-chosen strings (login
/// attempts are keyed by IP)
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    attempts: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    max_attempts: u32,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    /// Check if an attempt should be allowed
    /// Returns true if allowed, false if the key is over its budget
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;

        match attempts.get_mut(key) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_attempts {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                attempts.insert(key.to_string(), (1, now));
                true
            }
        }
    }

    /// Clean up stale entries (call periodically)
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
    }
}

/// Anti-abuse configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Clicks counted per connection per rolling second
    pub max_clicks_per_sec: u32,
    /// Concurrent sockets allowed per client IP
    pub max_conns_per_ip: u32,
    /// Host PIN attempts per IP per window
    pub login_max_attempts: u32,
    pub login_window_secs: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_clicks_per_sec: 15,
            max_conns_per_ip: 32,
            login_max_attempts: 5,
            login_window_secs: 60,
        }
    }
}

impl AbuseConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_clicks_per_sec = std::env::var("CLICK_RATE_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_clicks_per_sec)
            .max(1);

        let max_conns_per_ip = std::env::var("IP_CONN_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_conns_per_ip)
            .max(1);

        let login_max_attempts = std::env::var("LOGIN_RATE_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.login_max_attempts)
            .max(1);

        let login_window_secs = std::env::var("LOGIN_RATE_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.login_window_secs)
            .max(1);

        tracing::info!(
            max_clicks_per_sec,
            max_conns_per_ip,
            login_max_attempts,
            login_window_secs,
            "Anti-abuse config loaded"
        );

        Self {
            max_clicks_per_sec,
            max_conns_per_ip,
            login_max_attempts,
            login_window_secs,
        }
    }
}

//! Click-pattern analysis for auto-clicker detection.
//!
//! Humans click with jitter; scripts click on a metronome. We keep a bounded
//! history of inter-click intervals per connection and flag connections whose
//! coefficient of variation (stddev / mean) falls below a plausibility floor.
//! The flag is informational, shown on the leaderboard, and never blocks
//! scoring.

use crate::types::ConnectionId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Intervals kept per connection; older samples are evicted FIFO
const MAX_INTERVALS: usize = 50;

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Intervals needed before a verdict is attempted
    pub min_samples: usize,
    /// Coefficient of variation below this is considered inhuman
    pub cv_floor: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            cv_floor: 0.15,
        }
    }
}

impl BotConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_samples = std::env::var("BOT_MIN_SAMPLES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_samples)
            .max(2);

        let cv_floor = std::env::var("BOT_CV_FLOOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cv_floor);

        Self {
            min_samples,
            cv_floor,
        }
    }
}

/// Outcome of classifying one connection's click history
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub suspicious: bool,
    pub reason: Option<String>,
    /// None until enough samples exist (or the history is degenerate)
    pub cv: Option<f64>,
}

impl Verdict {
    fn clean(cv: Option<f64>) -> Self {
        Self {
            suspicious: false,
            reason: None,
            cv,
        }
    }
}

#[derive(Debug)]
struct ClickHistory {
    /// Inter-click intervals in seconds
    intervals: VecDeque<f64>,
    last_click: Instant,
}

/// Per-connection click-interval tracker
#[derive(Debug, Clone)]
pub struct BotDetector {
    histories: Arc<RwLock<HashMap<ConnectionId, ClickHistory>>>,
    config: BotConfig,
}

impl BotDetector {
    pub fn new(config: BotConfig) -> Self {
        Self {
            histories: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Record a click. The first click of a connection only anchors the
    /// timeline; intervals start with the second click.
    pub async fn note_click(&self, id: &str, now: Instant) {
        let mut histories = self.histories.write().await;
        match histories.get_mut(id) {
            Some(history) => {
                let delta = now.duration_since(history.last_click).as_secs_f64();
                if history.intervals.len() == MAX_INTERVALS {
                    history.intervals.pop_front();
                }
                history.intervals.push_back(delta);
                history.last_click = now;
            }
            None => {
                histories.insert(
                    id.to_string(),
                    ClickHistory {
                        intervals: VecDeque::with_capacity(MAX_INTERVALS),
                        last_click: now,
                    },
                );
            }
        }
    }

    pub async fn classify(&self, id: &str) -> Verdict {
        let histories = self.histories.read().await;
        let history = match histories.get(id) {
            Some(h) => h,
            None => return Verdict::clean(None),
        };

        if history.intervals.len() < self.config.min_samples {
            return Verdict::clean(None);
        }

        match coefficient_of_variation(&history.intervals) {
            // All-zero intervals (burst at one instant) give no usable signal
            None => Verdict::clean(None),
            Some(cv) if cv < self.config.cv_floor => Verdict {
                suspicious: true,
                reason: Some(format!(
                    "click intervals too regular (cv {:.1}%)",
                    cv * 100.0
                )),
                cv: Some(cv),
            },
            Some(cv) => Verdict::clean(Some(cv)),
        }
    }

    /// Drop one connection's history (disconnect, round reset)
    pub async fn reset(&self, id: &str) {
        self.histories.write().await.remove(id);
    }

    /// Drop every history (new round starts everyone fresh)
    pub async fn clear(&self) {
        self.histories.write().await.clear();
    }

    /// Evict histories for connections no longer alive (call periodically)
    pub async fn retain(&self, active: &HashSet<ConnectionId>) {
        self.histories
            .write()
            .await
            .retain(|id, _| active.contains(id));
    }
}

fn coefficient_of_variation(intervals: &VecDeque<f64>) -> Option<f64> {
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return None;
    }
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}

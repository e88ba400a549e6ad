/// Per-endpoint fixed-window rate limiting
///
/// Fixed-window semantics (chosen over sliding for simplicity): a window's
/// count resets to zero once `interval` has elapsed since `window_start`.
/// `allow` resets lazily on its own, so correctness never depends on the
/// background sweep - the sweep only keeps idle endpoints tidy and their
/// status output fresh. The limiter never sleeps; callers decide whether to
/// queue, fall back or error when `allow` returns false.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub interval: Duration,
}

impl RateLimitRule {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            interval: Duration::from_secs(60),
        }
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    window_start: Instant,
    rule: RateLimitRule,
}

impl Window {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
            rule,
        }
    }

    fn reset_if_elapsed(&mut self) {
        if self.window_start.elapsed() >= self.rule.interval {
            self.count = 0;
            self.window_start = Instant::now();
        }
    }

    fn resets_in_ms(&self) -> u64 {
        self.rule
            .interval
            .saturating_sub(self.window_start.elapsed())
            .as_millis() as u64
    }
}

/// Point-in-time view of one endpoint's window
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitStatus {
    pub current: u32,
    pub max: u32,
    pub resets_in_ms: u64,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    default_rule: RateLimitRule,
}

impl RateLimiter {
    pub fn new(default_rule: RateLimitRule) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            default_rule,
        }
    }

    /// Override the rule for one endpoint key (replaces any running window).
    pub fn configure(&self, endpoint: &str, rule: RateLimitRule) {
        let mut windows = self.windows.lock();
        windows.insert(endpoint.to_string(), Window::new(rule));
    }

    /// Whether another request for `endpoint` fits in the current window.
    /// Does not count the request - pair with [`record_attempt`](Self::record_attempt).
    pub fn allow(&self, endpoint: &str) -> bool {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(endpoint.to_string())
            .or_insert_with(|| Window::new(self.default_rule));
        window.reset_if_elapsed();
        window.count < window.rule.max_requests
    }

    /// Count one request against `endpoint`'s window.
    pub fn record_attempt(&self, endpoint: &str) {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(endpoint.to_string())
            .or_insert_with(|| Window::new(self.default_rule));
        window.reset_if_elapsed();
        window.count += 1;
    }

    /// Current window for `endpoint` (None if it has never been used).
    pub fn endpoint_status(&self, endpoint: &str) -> Option<RateLimitStatus> {
        let windows = self.windows.lock();
        windows.get(endpoint).map(|w| RateLimitStatus {
            current: w.count,
            max: w.rule.max_requests,
            resets_in_ms: w.resets_in_ms(),
        })
    }

    /// Snapshot of every known window, keyed by endpoint.
    pub fn status(&self) -> HashMap<String, RateLimitStatus> {
        let windows = self.windows.lock();
        windows
            .iter()
            .map(|(endpoint, w)| {
                (
                    endpoint.clone(),
                    RateLimitStatus {
                        current: w.count,
                        max: w.rule.max_requests,
                        resets_in_ms: w.resets_in_ms(),
                    },
                )
            })
            .collect()
    }

    /// Reset every elapsed window, independent of traffic, so idle endpoints
    /// recover too. Called by the background sweeper.
    pub fn sweep_reset(&self) {
        let mut windows = self.windows.lock();
        for window in windows.values_mut() {
            window.reset_if_elapsed();
        }
    }

    /// Spawn the periodic window-reset sweep.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep_reset();
            }
        })
    }
}

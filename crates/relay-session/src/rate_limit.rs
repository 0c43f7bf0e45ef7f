//! Per-sender fixed-window rate limiting for chat messages.
//!
//! Each key gets a lazily created window holding a count and the instant the
//! window resets. Once a window elapses the next event starts a fresh one.
//!
//! This is a fixed window, not a sliding one: a burst straddling a window
//! boundary can admit up to `2 * max_events` in a short span.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Counter state for one key.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    /// Events admitted in the current window.
    count: u32,
    /// When the current window expires.
    reset_at: Instant,
}

/// Fixed-window throttle keyed by sender id.
///
/// Safe to share across tasks; each key is updated under its shard lock.
#[derive(Debug)]
pub struct RateLimiter {
    max_events: u32,
    window: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_events` per `window` for each key.
    #[must_use]
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            windows: DashMap::new(),
        }
    }

    /// Record an event for `key`, returning whether it is admitted.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                count: 0,
                reset_at: now + self.window,
            });

        let window = entry.value_mut();
        if window.count == 0 || now >= window.reset_at {
            *window = RateWindow {
                count: 1,
                reset_at: now + self.window,
            };
            return true;
        }

        if window.count < self.max_events {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Events still admissible for `key` in its current window.
    #[must_use]
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get(key) {
            Some(window) if now < window.reset_at => {
                self.max_events.saturating_sub(window.count)
            }
            _ => self.max_events,
        }
    }

    /// Drop every window that has already elapsed. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| now < window.reset_at);
        before.saturating_sub(self.windows.len())
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Configured cap per window.
    #[must_use]
    pub fn max_events(&self) -> u32 {
        self.max_events
    }

    /// Configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

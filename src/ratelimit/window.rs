//! Sliding-window bookkeeping for one resource class.
//!
//! Pure state: every method takes `now` explicitly and nothing here sleeps.
//! The async [`RateLimiter`](super::RateLimiter) owns one of these behind a
//! mutex and does the waiting.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{DuckyError, Result};

/// Budget for one resource class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Floor between consecutive grants.
    pub min_delay: Duration,
    /// Grants allowed inside any `window`-length interval.
    pub max_calls_per_window: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create config from millisecond values.
    pub fn new(min_delay_ms: u64, max_calls_per_window: u32, window_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            max_calls_per_window,
            window: Duration::from_millis(window_ms),
        }
    }

    /// Reject budgets that could never grant.
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_window == 0 {
            return Err(DuckyError::InvalidConfig(
                "max_calls_per_window must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(DuckyError::InvalidConfig("window must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// 15 writes per 15 minutes, 3s apart.
    fn default() -> Self {
        Self::new(3_000, 15, 15 * 60 * 1000)
    }
}

/// Read-only view returned by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Grants inside the current window
    pub count: u32,
    pub remaining: u32,
    pub can_proceed_now: bool,
    /// Zero when `can_proceed_now`
    pub wait_time: Duration,
}

/// Persisted form of a window, in wall-clock epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub resource_class: String,
    pub grants_ms: Vec<i64>,
    pub last_call_ms: Option<i64>,
}

/// Grant log for one resource class.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    config: RateLimitConfig,
    /// Grant instants still inside the window, oldest first
    grants: VecDeque<Instant>,
    last_call_at: Option<Instant>,
}

impl RateLimitWindow {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            grants: VecDeque::new(),
            last_call_at: None,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Drop grants that have aged out of the window.
    pub fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if oldest + self.config.window <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn active(&self, now: Instant) -> impl Iterator<Item = &Instant> {
        let window = self.config.window;
        self.grants.iter().filter(move |g| **g + window > now)
    }

    /// Grants counted against the budget at `now`.
    pub fn call_count(&self, now: Instant) -> u32 {
        self.active(now).count() as u32
    }

    /// Start of the current window: the oldest grant still counted.
    pub fn window_started_at(&self, now: Instant) -> Option<Instant> {
        self.active(now).next().copied()
    }

    /// Earliest instant at which a grant would be legal.
    pub fn next_allowed_at(&self, now: Instant) -> Instant {
        let mut ready = now;

        if let Some(last) = self.last_call_at {
            ready = ready.max(last + self.config.min_delay);
        }

        let active: Vec<Instant> = self.active(now).copied().collect();
        let max = self.config.max_calls_per_window as usize;
        if active.len() >= max {
            // The grant whose expiry brings the count back under the budget
            let freeing = active[active.len() - max];
            ready = ready.max(freeing + self.config.window);
        }

        ready
    }

    /// Record a grant at `now`. Callers must have waited for `next_allowed_at`.
    pub fn record(&mut self, now: Instant) {
        self.expire(now);
        self.grants.push_back(now);
        self.last_call_at = Some(now);
    }

    pub fn status(&self, now: Instant) -> RateLimitStatus {
        let count = self.call_count(now);
        let remaining = self.config.max_calls_per_window.saturating_sub(count);
        let wait_time = self.next_allowed_at(now).saturating_duration_since(now);
        RateLimitStatus {
            count,
            remaining,
            can_proceed_now: wait_time.is_zero(),
            wait_time,
        }
    }

    pub fn reset(&mut self) {
        self.grants.clear();
        self.last_call_at = None;
    }

    /// Convert to wall-clock form for persistence.
    pub fn snapshot(&self, resource_class: &str, now: Instant, now_ms: i64) -> WindowSnapshot {
        let to_wall = |i: Instant| now_ms - now.saturating_duration_since(i).as_millis() as i64;
        WindowSnapshot {
            resource_class: resource_class.to_string(),
            grants_ms: self.active(now).map(|g| to_wall(*g)).collect(),
            last_call_ms: self.last_call_at.map(to_wall),
        }
    }

    /// Rebuild from a snapshot, ignoring grants that already aged out.
    pub fn restore(&mut self, snapshot: &WindowSnapshot, now: Instant, now_ms: i64) {
        let to_instant = |ms: i64| -> Option<Instant> {
            let age = now_ms.checked_sub(ms)?;
            if age < 0 {
                return Some(now);
            }
            now.checked_sub(Duration::from_millis(age as u64))
        };

        let window_ms = self.config.window.as_millis() as i64;
        let mut grants: Vec<Instant> = snapshot
            .grants_ms
            .iter()
            .filter(|ms| now_ms - **ms < window_ms)
            .filter_map(|ms| to_instant(*ms))
            .collect();
        grants.sort();

        self.grants = grants.into();
        self.last_call_at = snapshot.last_call_ms.and_then(to_instant);
    }
}

//! Async rate limiter: one instance per resource class.
//!
//! The window sits behind a tokio mutex that is held across the wait, so
//! concurrent callers queue in FIFO order and every grant is accounted against
//! the state the previous grant left behind.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::window::{RateLimitConfig, RateLimitStatus, RateLimitWindow, WindowSnapshot};
use crate::error::{DuckyError, Result};
use crate::id::now_ms;

/// Durable home for window snapshots.
pub trait WindowStore: Send + Sync {
    fn load_window(&self, resource_class: &str) -> Result<Option<WindowSnapshot>>;

    fn save_window(&self, snapshot: &WindowSnapshot) -> Result<()>;
}

/// Proactive throttle for one resource class.
pub struct RateLimiter {
    resource_class: String,
    window: Mutex<RateLimitWindow>,
    store: Option<Arc<dyn WindowStore>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("resource_class", &self.resource_class)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create an in-memory limiter.
    pub fn new(resource_class: impl Into<String>, config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resource_class: resource_class.into(),
            window: Mutex::new(RateLimitWindow::new(config)),
            store: None,
        })
    }

    /// Create a limiter that restores from and saves to `store`.
    pub fn with_store(
        resource_class: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn WindowStore>,
    ) -> Result<Self> {
        let resource_class = resource_class.into();
        config.validate()?;
        let mut window = RateLimitWindow::new(config);

        if let Some(snapshot) = store.load_window(&resource_class)? {
            window.restore(&snapshot, Instant::now(), now_ms());
            log::info!(
                "Restored {} rate limit window: {} grants in flight",
                resource_class,
                window.call_count(Instant::now())
            );
        }

        Ok(Self {
            resource_class,
            window: Mutex::new(window),
            store: Some(store),
        })
    }

    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }

    /// Wait until a call is legal, then record it.
    ///
    /// Never fails. A persistence error is logged and the grant still stands.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;

        loop {
            let now = Instant::now();
            window.expire(now);
            let ready = window.next_allowed_at(now);
            if ready <= now {
                break;
            }
            let wait = ready - now;
            if wait > window.config().min_delay {
                log::info!(
                    "Rate limit window for {} is full, waiting {:.1}s",
                    self.resource_class,
                    wait.as_secs_f64()
                );
            } else {
                log::debug!("Spacing {} call by {}ms", self.resource_class, wait.as_millis());
            }
            tokio::time::sleep_until(ready).await;
        }

        let now = Instant::now();
        window.record(now);

        let count = window.call_count(now);
        let max = window.config().max_calls_per_window;
        if count * 5 > max * 4 {
            log::warn!(
                "High rate limit usage for {}: {}/{}",
                self.resource_class,
                count,
                max
            );
        }

        // Saved under the lock so snapshots land in grant order
        if let Some(store) = &self.store {
            let snapshot = window.snapshot(&self.resource_class, now, now_ms());
            if let Err(e) = store.save_window(&snapshot) {
                log::warn!("Failed to persist {} rate limit window: {}", self.resource_class, e);
            }
        }
    }

    /// Current budget without consuming any.
    pub async fn status(&self) -> RateLimitStatus {
        self.window.lock().await.status(Instant::now())
    }

    /// Clear counters. For tests and operational recovery.
    pub async fn reset(&self) {
        let mut window = self.window.lock().await;
        window.reset();
        if let Some(store) = &self.store {
            let snapshot = window.snapshot(&self.resource_class, Instant::now(), now_ms());
            if let Err(e) = store.save_window(&snapshot) {
                log::warn!("Failed to persist {} rate limit reset: {}", self.resource_class, e);
            }
        }
        log::info!("Reset {} rate limit window", self.resource_class);
    }
}

/// Owner of one limiter per resource class, built once at startup.
#[derive(Debug, Default, Clone)]
pub struct RateLimiters {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build in-memory limiters from a class → config map.
    pub fn from_configs(configs: &HashMap<String, RateLimitConfig>) -> Result<Self> {
        let mut limiters = Self::new();
        for (class, config) in configs {
            limiters.insert(RateLimiter::new(class.clone(), config.clone())?);
        }
        Ok(limiters)
    }

    /// Build persisted limiters from a class → config map.
    pub fn from_configs_with_store(
        configs: &HashMap<String, RateLimitConfig>,
        store: Arc<dyn WindowStore>,
    ) -> Result<Self> {
        let mut limiters = Self::new();
        for (class, config) in configs {
            limiters.insert(RateLimiter::with_store(class.clone(), config.clone(), store.clone())?);
        }
        Ok(limiters)
    }

    pub fn insert(&mut self, limiter: RateLimiter) {
        self.limiters
            .insert(limiter.resource_class().to_string(), Arc::new(limiter));
    }

    pub fn get(&self, resource_class: &str) -> Result<Arc<RateLimiter>> {
        self.limiters
            .get(resource_class)
            .cloned()
            .ok_or_else(|| DuckyError::InvalidConfig(format!("unknown resource class: {}", resource_class)))
    }

    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.limiters.keys().cloned().collect();
        classes.sort();
        classes
    }
}

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{ActionError, ErrorKind};

/// Delay growth between transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base_delay * attempt`
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`
    Exponential { multiplier: f64, max_delay: Duration },
}

/// Configuration for one retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    pub base_delay: Duration,

    /// Wait applied to a rate-limit failure without a reset hint.
    pub rate_limit_cooldown: Duration,

    /// Rate-limit waits tolerated per call before giving up.
    pub max_rate_limit_waits: u32,

    pub backoff: Backoff,
}

impl RetryConfig {
    /// Linear backoff with default rate-limit handling.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt.max(1)),
            Backoff::Exponential { multiplier, max_delay } => {
                let exp = attempt.saturating_sub(1) as i32;
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(exp);
                // Negative or NaN products fall back to the base delay
                Duration::try_from_secs_f64(secs.min(max_delay.as_secs_f64())).unwrap_or(self.base_delay)
            }
        }
    }
}

impl Default for RetryConfig {
    /// 3 attempts, 5s linear backoff, 15 minute rate-limit cooldown.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(15 * 60),
            max_rate_limit_waits: 4,
            backoff: Backoff::Linear,
        }
    }
}

/// Terminal outcome of a retried call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Still rate limited after {waits} waits")]
    RateLimitExhausted { waits: u32 },
}

impl RetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetryError::Exhausted { .. } => ErrorKind::Transient,
            RetryError::Fatal(_) => ErrorKind::Fatal,
            RetryError::RateLimitExhausted { .. } => ErrorKind::RateLimited,
        }
    }

    /// Whether the side effect may have happened before the failure.
    pub fn is_reconcilable(&self) -> bool {
        !matches!(self, RetryError::Fatal(_))
    }
}

/// Runs an action until it succeeds or a terminal condition is reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `action`, retrying per the configured classification.
    ///
    /// `action` is called again for every retry, so it must rebuild its
    /// request each time.
    pub async fn execute<T, F, Fut>(&self, mut action: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_waits: u32 = 0;

        loop {
            attempt += 1;
            match action().await {
                Ok(value) => {
                    if attempt > 1 || rate_limit_waits > 0 {
                        log::debug!("Succeeded on attempt {} after {} rate-limit waits", attempt, rate_limit_waits);
                    }
                    return Ok(value);
                }
                Err(ActionError::RateLimited { reset_hint }) => {
                    // Rate limits do not count against the attempt budget
                    attempt -= 1;
                    if rate_limit_waits >= self.config.max_rate_limit_waits {
                        log::warn!("Giving up after {} rate-limit waits", rate_limit_waits);
                        return Err(RetryError::RateLimitExhausted { waits: rate_limit_waits });
                    }
                    rate_limit_waits += 1;
                    let wait = reset_hint.unwrap_or(self.config.rate_limit_cooldown);
                    log::warn!(
                        "Rate limited, waiting {:.0}s before retrying (wait {}/{})",
                        wait.as_secs_f64(),
                        rate_limit_waits,
                        self.config.max_rate_limit_waits
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(ActionError::Transient(msg)) => {
                    if attempt >= self.config.max_attempts {
                        log::warn!("Transient failure on final attempt {}: {}", attempt, msg);
                        return Err(RetryError::Exhausted { attempts: attempt, last: msg });
                    }
                    let delay = self.config.delay_for_attempt(attempt);
                    log::info!(
                        "Attempt {}/{} failed: {}. Retrying in {}ms",
                        attempt,
                        self.config.max_attempts,
                        msg,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(ActionError::Fatal(msg)) => {
                    log::error!("Fatal error on attempt {}: {}", attempt, msg);
                    return Err(RetryError::Fatal(msg));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::linear(max_attempts, Duration::from_millis(base_ms)))
    }

    /// Action that fails with the scripted errors, then succeeds.
    fn scripted(
        errors: Vec<ActionError>,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str, ActionError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            std::future::ready(match errors.get(n) {
                Some(e) => Err(e.clone()),
                None => Ok("ok"),
            })
        };
        (calls, action)
    }

    #[test]
    fn test_linear_delays() {
        let config = RetryConfig::linear(3, Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(10000));
    }

    #[test]
    fn test_exponential_delays_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_delay: Duration::from_secs(10),
            },
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10));
    }

    #[test]
    fn test_negative_multiplier_does_not_panic() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential {
                multiplier: -2.0,
                max_delay: Duration::from_secs(10),
            },
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let (calls, action) = scripted(vec![]);
        let result = policy(3, 100).execute(action).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let (calls, action) = scripted(vec![ActionError::transient("503")]);
        let start = Instant::now();
        let result = policy(3, 100).execute(action).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_after_max_attempts() {
        let errors = vec![ActionError::transient("503"); 5];
        let (calls, action) = scripted(errors);
        let start = Instant::now();

        let result = policy(3, 100).execute(action).await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "503".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms * 1 + 100ms * 2
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_aborts_immediately() {
        let (calls, action) = scripted(vec![ActionError::fatal("401")]);
        let start = Instant::now();
        let result = policy(3, 100).execute(action).await;
        assert_eq!(result, Err(RetryError::Fatal("401".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_does_not_consume_attempts() {
        let errors = vec![
            ActionError::rate_limited(Some(Duration::from_secs(60))),
            ActionError::transient("503"),
            ActionError::rate_limited(None),
            ActionError::transient("503"),
        ];
        let (calls, action) = scripted(errors);

        let result = policy(3, 10).execute(action).await;

        // Two transient failures out of three attempts, then success
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_uses_hint_then_cooldown() {
        let config = RetryConfig {
            rate_limit_cooldown: Duration::from_secs(900),
            ..RetryConfig::linear(3, Duration::from_millis(10))
        };
        let (_, action) = scripted(vec![ActionError::rate_limited(Some(Duration::from_secs(30)))]);
        let start = Instant::now();
        RetryPolicy::new(config).execute(action).await.unwrap();
        let hinted = start.elapsed();
        assert!(hinted >= Duration::from_secs(30));
        assert!(hinted < Duration::from_secs(900));

        let (_, action) = scripted(vec![ActionError::rate_limited(None)]);
        let start = Instant::now();
        RetryPolicy::new(config).execute(action).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_are_capped() {
        let config = RetryConfig {
            max_rate_limit_waits: 2,
            ..RetryConfig::linear(3, Duration::from_millis(10))
        };
        let errors = vec![ActionError::rate_limited(Some(Duration::from_secs(1))); 10];
        let (calls, action) = scripted(errors);

        let result = RetryPolicy::new(config).execute(action).await;

        assert_eq!(result, Err(RetryError::RateLimitExhausted { waits: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_error_kind() {
        assert_eq!(
            RetryError::Exhausted {
                attempts: 3,
                last: "x".to_string()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(RetryError::Fatal("x".to_string()).kind(), ErrorKind::Fatal);
        assert!(!RetryError::Fatal("x".to_string()).is_reconcilable());
        assert!(RetryError::RateLimitExhausted { waits: 1 }.is_reconcilable());
    }
}

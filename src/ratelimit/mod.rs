//! Rate limiting for calls against quota-constrained services.
//!
//! Each resource class (e.g. `write` vs `search`) gets its own
//! [`RateLimiter`] with fully separate state. The limiter is the proactive
//! throttle; provider-side 429s are handled reactively by the retry policy.
//!
//! Limiters are plain values built at startup and passed to whoever needs them,
//! so tests construct fresh, isolated instances.

mod limiter;
mod window;

pub use limiter::{RateLimiter, RateLimiters, WindowStore};
pub use window::{RateLimitConfig, RateLimitStatus, RateLimitWindow, WindowSnapshot};

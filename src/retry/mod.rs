//! Bounded retries around calls to external collaborators.
//!
//! Classification comes from [`ActionError`](crate::domain::ActionError):
//! rate limits wait and do not consume an attempt, transient errors back off
//! and do, fatal errors return immediately.

mod policy;

pub use policy::{Backoff, RetryConfig, RetryError, RetryPolicy};

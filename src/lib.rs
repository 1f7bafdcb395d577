//! Ducky - scheduling and safety core for an automated social-media persona
//!
//! Cron-triggered jobs pull candidate items from external services and act
//! on each one at most once, under per-resource-class rate limits, with
//! bounded retries and a durable dedup store.

pub mod audit;
pub mod batch;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod http;
pub mod id;
pub mod jobs;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use error::{DuckyError, Result};

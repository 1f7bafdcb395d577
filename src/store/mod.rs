//! Durable storage for Ducky.
//!
//! A single SQLite database holds three tables:
//! - **dedup_records**: one row per external id, the idempotency ledger
//! - **rate_windows**: the latest grant log per resource class
//! - **audit_log**: run summaries and job execution events
//!
//! [`SqliteStore`] implements [`DedupStore`](crate::dedup::DedupStore),
//! [`WindowStore`](crate::ratelimit::WindowStore) and
//! [`AuditSink`](crate::audit::AuditSink), so one handle can be shared by
//! every consumer.

mod sqlite;

pub use sqlite::SqliteStore;

//! ID generation utilities for Ducky
//!
//! Provides identifiers for batch runs and audit entries.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique run ID for one batch pass
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", now_ms(), random)
}

/// Generate an audit entry ID
///
/// Format: `audit-{timestamp_ms}-{random_hex}`
pub fn generate_audit_id() -> String {
    let random: u16 = rand::rng().random();
    format!("audit-{}-{:04x}", now_ms(), random)
}

//! Dedup record persisted per external id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted claim/outcome for one `external_id`.
///
/// Created unprocessed when an item is claimed. Flipped to processed only after
/// the side effect is confirmed; left unprocessed with a bumped `retry_count`
/// when retries run out, so a later run can pick it up again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupRecord {
    /// Unique key
    pub external_id: String,

    pub processed: bool,

    /// Resulting external id (e.g. the posted reply's id)
    pub outcome_ref: Option<String>,

    pub processed_at: Option<DateTime<Utc>>,

    /// Number of runs that exhausted retries on this item
    pub retry_count: u32,

    pub last_retry_at: Option<DateTime<Utc>>,

    /// When the first claim landed
    pub claimed_at: DateTime<Utc>,

    /// Caller-supplied context captured at claim time
    pub metadata: serde_json::Value,
}

impl DedupRecord {
    /// A fresh, unprocessed claim.
    pub fn claimed(external_id: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            external_id: external_id.into(),
            processed: false,
            outcome_ref: None,
            processed_at: None,
            retry_count: 0,
            last_retry_at: None,
            claimed_at: Utc::now(),
            metadata,
        }
    }

    /// Whether a later run is allowed to try this item again.
    pub fn is_retryable(&self, max_item_retries: u32) -> bool {
        !self.processed && self.retry_count < max_item_retries
    }
}

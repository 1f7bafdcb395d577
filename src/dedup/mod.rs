//! Idempotency bookkeeping keyed by external id.
//!
//! Every side effect is preceded by a `claim`, and an item is only marked
//! processed once its effect is confirmed. Claims are idempotent, so two
//! workers racing on the same id both succeed and leave exactly one record.

mod memory;

pub use memory::MemoryDedupStore;

use serde_json::Value;

use crate::domain::DedupRecord;
use crate::error::Result;

/// Persistence-backed idempotency check plus claim/mark.
pub trait DedupStore: Send + Sync {
    /// True only if a record exists and is processed.
    fn is_processed(&self, external_id: &str) -> Result<bool>;

    /// Insert an unprocessed record. A no-op if one already exists.
    fn claim(&self, external_id: &str, metadata: &Value) -> Result<()>;

    /// Flip the record to processed. Creates it if the claim was lost.
    fn mark_processed(&self, external_id: &str, outcome_ref: &str) -> Result<()>;

    /// Bump `retry_count` after retries were exhausted for this item.
    fn increment_retry(&self, external_id: &str) -> Result<()>;

    fn get(&self, external_id: &str) -> Result<Option<DedupRecord>>;
}

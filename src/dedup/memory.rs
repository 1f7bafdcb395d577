//! In-memory dedup store for tests and dry runs.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::DedupStore;
use crate::domain::DedupRecord;
use crate::error::{DuckyError, Result};

#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    records: Mutex<HashMap<String, DedupRecord>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DedupRecord>>> {
        self.records
            .lock()
            .map_err(|e| DuckyError::Storage(format!("dedup lock poisoned: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupStore for MemoryDedupStore {
    fn is_processed(&self, external_id: &str) -> Result<bool> {
        Ok(self.lock()?.get(external_id).is_some_and(|r| r.processed))
    }

    fn claim(&self, external_id: &str, metadata: &Value) -> Result<()> {
        self.lock()?
            .entry(external_id.to_string())
            .or_insert_with(|| DedupRecord::claimed(external_id, metadata.clone()));
        Ok(())
    }

    fn mark_processed(&self, external_id: &str, outcome_ref: &str) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .entry(external_id.to_string())
            .or_insert_with(|| DedupRecord::claimed(external_id, Value::Null));
        record.processed = true;
        record.outcome_ref = Some(outcome_ref.to_string());
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    fn increment_retry(&self, external_id: &str) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .entry(external_id.to_string())
            .or_insert_with(|| DedupRecord::claimed(external_id, Value::Null));
        record.retry_count += 1;
        record.last_retry_at = Some(Utc::now());
        Ok(())
    }

    fn get(&self, external_id: &str) -> Result<Option<DedupRecord>> {
        Ok(self.lock()?.get(external_id).cloned())
    }
}

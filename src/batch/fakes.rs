//! In-memory collaborators for tests and local experiments.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ActionInvoker, CandidateSource};
use crate::domain::{ActionError, CandidatePage, Cursor, PageRequest, ProcessableItem};

/// Serves fixed pages. The cursor is the index of the next page.
#[derive(Debug, Default)]
pub struct VecCandidateSource {
    pages: Vec<Vec<ProcessableItem>>,
    fetches: AtomicUsize,
    fail_with: Mutex<Option<ActionError>>,
}

impl VecCandidateSource {
    pub fn single(items: Vec<ProcessableItem>) -> Self {
        Self::paged(vec![items])
    }

    pub fn paged(pages: Vec<Vec<ProcessableItem>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Every fetch fails with `error`.
    pub fn failing(error: ActionError) -> Self {
        Self {
            fail_with: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSource for VecCandidateSource {
    async fn fetch_candidates(&self, request: PageRequest) -> Result<CandidatePage, ActionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(guard) = self.fail_with.lock() {
            if let Some(e) = guard.as_ref() {
                return Err(e.clone());
            }
        }

        let index = match &request.cursor {
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| ActionError::fatal(format!("bad cursor: {}", cursor.as_str())))?,
            None => 0,
        };

        let items: Vec<ProcessableItem> = self
            .pages
            .get(index)
            .map(|page| page.iter().take(request.limit).cloned().collect())
            .unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| Cursor((index + 1).to_string()));

        Ok(CandidatePage { items, next_cursor })
    }
}

/// Succeeds with `out-{id}` unless a failure was scripted for the item.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    failures: Mutex<HashMap<String, VecDeque<ActionError>>>,
    reconciled: HashMap<String, String>,
    performed: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next calls for `external_id` with `errors`, in order.
    pub fn fail_with(self, external_id: &str, errors: Vec<ActionError>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(external_id.to_string(), errors.into());
        }
        self
    }

    /// Fail `external_id` fatally on every call.
    pub fn always_fatal(self, external_id: &str) -> Self {
        self.fail_with(external_id, vec![ActionError::fatal("rejected"); 64])
    }

    /// Report `outcome_ref` from `reconcile` for `external_id`.
    pub fn reconciles(mut self, external_id: &str, outcome_ref: &str) -> Self {
        self.reconciled
            .insert(external_id.to_string(), outcome_ref.to_string());
        self
    }

    /// Ids passed to `perform`, one entry per call.
    pub fn performed(&self) -> Vec<String> {
        self.performed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ActionInvoker for ScriptedInvoker {
    async fn perform(&self, item: &ProcessableItem) -> Result<String, ActionError> {
        if let Ok(mut performed) = self.performed.lock() {
            performed.push(item.external_id.clone());
        }
        let scripted = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(&item.external_id).and_then(|q| q.pop_front()));
        match scripted {
            Some(e) => Err(e),
            None => Ok(format!("out-{}", item.external_id)),
        }
    }

    async fn reconcile(&self, item: &ProcessableItem) -> Result<Option<String>, ActionError> {
        Ok(self.reconciled.get(&item.external_id).cloned())
    }
}

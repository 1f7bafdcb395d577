//! Batch runner and the collaborator traits it drives.
//!
//! A pass pulls bounded pages from a [`CandidateSource`], filters out items
//! that were already handled, and pushes each remaining item through the
//! write rate limiter and retry policy to an [`ActionInvoker`].

pub mod fakes;
mod runner;

pub use runner::{BatchConfig, BatchRunner};

use async_trait::async_trait;

use crate::domain::{ActionError, CandidatePage, PageRequest, ProcessableItem};

/// Pages of candidate items from an external service.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_candidates(&self, request: PageRequest) -> Result<CandidatePage, ActionError>;
}

/// Performs the external side effect for one item.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Perform the action and return the resulting external reference.
    async fn perform(&self, item: &ProcessableItem) -> Result<String, ActionError>;

    /// Look up whether the action already took effect for `item`.
    ///
    /// Called after a terminal non-fatal failure. Returning an outcome
    /// reference marks the item processed instead of failed.
    async fn reconcile(&self, _item: &ProcessableItem) -> Result<Option<String>, ActionError> {
        Ok(None)
    }
}

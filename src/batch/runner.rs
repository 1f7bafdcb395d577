//! One bounded pass over a candidate source.
//!
//! ```text
//! Idle -> Fetching -> ItemLoop -> (Fetching -> ItemLoop)* -> Draining -> Done
//! ```
//!
//! Items are processed strictly one after another. Every action is preceded by
//! a claim in the dedup store, and an item is only marked processed once the
//! action reports success (or reconciliation proves it happened).

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{ActionInvoker, CandidateSource};
use crate::audit::{AuditEntry, AuditSink, record_quietly};
use crate::dedup::DedupStore;
use crate::domain::{ErrorKind, PageRequest, ProcessableItem, RunPhase, RunState, RunSummary, StopReason, prioritize};
use crate::ratelimit::RateLimiter;
use crate::retry::{RetryError, RetryPolicy};

/// Bounds and pacing for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Stop once this many items were processed
    pub max_items_per_run: usize,
    pub max_run_time: Duration,
    /// Items per pacing group
    pub batch_size: usize,
    /// Cooldown between pacing groups
    pub batch_delay: Duration,
    pub page_size: usize,
    /// Pages fetched per pass; 0 means no limit
    pub max_pages: usize,
    /// Items whose retry count reached this are left alone
    pub max_item_retries: u32,
    /// End the pass when the write window has no budget left
    pub stop_when_exhausted: bool,
    /// Fetch and filter only; no claims, actions or dedup writes
    pub dry_run: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items_per_run: 30,
            max_run_time: Duration::from_secs(45 * 60),
            batch_size: 5,
            batch_delay: Duration::from_secs(30),
            page_size: 20,
            max_pages: 10,
            max_item_retries: 3,
            stop_when_exhausted: true,
            dry_run: false,
        }
    }
}

/// Drives items through the write limiter and retry policy.
pub struct BatchRunner {
    job: String,
    config: BatchConfig,
    dedup: Arc<dyn DedupStore>,
    write_limiter: Arc<RateLimiter>,
    fetch_limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl BatchRunner {
    pub fn new(
        job: impl Into<String>,
        config: BatchConfig,
        dedup: Arc<dyn DedupStore>,
        write_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            job: job.into(),
            config,
            dedup,
            write_limiter,
            fetch_limiter: None,
            retry,
            audit,
        }
    }

    /// Throttle page fetches with a separate resource class.
    pub fn with_fetch_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.fetch_limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run one pass. Per-item failures are recorded in the summary, never returned.
    pub async fn run(&self, source: &dyn CandidateSource, invoker: &dyn ActionInvoker) -> RunSummary {
        let mut state = RunState::start(&self.job, self.config.max_run_time);
        log::info!(
            "{}: starting run {}{}",
            self.job,
            state.run_id,
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        self.run_pages(&mut state, source, invoker).await;

        state.transition(RunPhase::Draining);
        let summary = state.summarize(self.config.dry_run);
        log::info!("{}", summary.headline());
        for error in &summary.errors {
            log::warn!("{}: {} failed ({}): {}", self.job, error.external_id, error.kind.as_str(), error.message);
        }
        record_quietly(self.audit.as_ref(), &AuditEntry::run_summary(&summary));
        state.transition(RunPhase::Done);

        summary
    }

    async fn run_pages(&self, state: &mut RunState, source: &dyn CandidateSource, invoker: &dyn ActionInvoker) {
        let mut cursor = None;
        let mut in_group = 0usize;

        loop {
            if state.past_deadline() {
                state.stop(StopReason::Deadline);
                return;
            }
            if state.items_processed >= self.config.max_items_per_run {
                state.stop(StopReason::MaxItems);
                return;
            }
            if self.config.max_pages > 0 && state.pages_fetched >= self.config.max_pages {
                state.stop(StopReason::MaxPages);
                return;
            }

            state.transition(RunPhase::Fetching);
            let request = PageRequest {
                cursor: cursor.clone(),
                limit: self.config.page_size,
            };
            let fetch_limiter = self.fetch_limiter.as_ref();
            let fetched = self
                .retry
                .execute(move || {
                    let request = request.clone();
                    async move {
                        if let Some(limiter) = fetch_limiter {
                            limiter.acquire().await;
                        }
                        source.fetch_candidates(request).await
                    }
                })
                .await;

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    log::error!("{}: failed to fetch candidates: {}", self.job, e);
                    state.record_error("<fetch>", e.kind(), e.to_string());
                    state.stop(StopReason::FetchFailed);
                    return;
                }
            };
            state.pages_fetched += 1;

            let mut items = page.items;
            log::debug!("{}: page {} has {} candidates", self.job, state.pages_fetched, items.len());
            prioritize(&mut items);
            if items.len() > self.config.page_size {
                log::debug!("{}: source returned {} items, keeping {}", self.job, items.len(), self.config.page_size);
                items.truncate(self.config.page_size);
            }

            state.transition(RunPhase::ItemLoop);
            for item in &items {
                if state.past_deadline() {
                    state.stop(StopReason::Deadline);
                    return;
                }
                if state.items_processed >= self.config.max_items_per_run {
                    state.stop(StopReason::MaxItems);
                    return;
                }
                state.items_seen += 1;

                if !self.should_attempt(state, item) {
                    continue;
                }

                if self.config.dry_run {
                    log::info!("{}: [dry run] would process {}", self.job, item.external_id);
                    state.items_processed += 1;
                    continue;
                }

                let budget = self.write_limiter.status().await;
                if self.config.stop_when_exhausted && budget.remaining == 0 {
                    log::info!(
                        "{}: {} window exhausted, ending run early",
                        self.job,
                        self.write_limiter.resource_class()
                    );
                    state.stop(StopReason::RateLimitExhausted);
                    return;
                }
                // Waiting for the limiter would overrun the deadline
                if Instant::now() + budget.wait_time >= state.deadline {
                    state.stop(StopReason::Deadline);
                    return;
                }

                if in_group >= self.config.batch_size.max(1) {
                    if Instant::now() + self.config.batch_delay >= state.deadline {
                        state.stop(StopReason::Deadline);
                        return;
                    }
                    log::debug!("{}: batch complete, cooling down {}ms", self.job, self.config.batch_delay.as_millis());
                    tokio::time::sleep(self.config.batch_delay).await;
                    in_group = 0;
                }

                in_group += 1;
                self.process_item(state, item, invoker).await;
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    state.stop(StopReason::SourceExhausted);
                    return;
                }
            }
        }
    }

    /// Dedup and retry-limit filtering. Counts skips.
    fn should_attempt(&self, state: &mut RunState, item: &ProcessableItem) -> bool {
        let id = &item.external_id;

        match self.dedup.is_processed(id) {
            Ok(true) => {
                log::debug!("{}: {} already processed, skipping", self.job, id);
                state.items_skipped += 1;
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                state.record_error(id, ErrorKind::Storage, e.to_string());
                return false;
            }
        }

        match self.dedup.get(id) {
            Ok(Some(record)) if !record.is_retryable(self.config.max_item_retries) => {
                log::info!(
                    "{}: {} reached {} retries, skipping",
                    self.job,
                    id,
                    record.retry_count
                );
                state.items_skipped_retry_limit += 1;
                false
            }
            Ok(_) => true,
            Err(e) => {
                state.record_error(id, ErrorKind::Storage, e.to_string());
                false
            }
        }
    }

    async fn process_item(&self, state: &mut RunState, item: &ProcessableItem, invoker: &dyn ActionInvoker) {
        let id = &item.external_id;
        let metadata = json!({
            "job": self.job,
            "run_id": state.run_id,
            "score": item.score,
        });

        // Claim before send
        if let Err(e) = self.dedup.claim(id, &metadata) {
            log::error!("{}: failed to claim {}: {}", self.job, id, e);
            state.record_error(id, ErrorKind::Storage, e.to_string());
            return;
        }

        let limiter = &self.write_limiter;
        let result = self
            .retry
            .execute(move || async move {
                limiter.acquire().await;
                invoker.perform(item).await
            })
            .await;

        match result {
            Ok(outcome_ref) => {
                log::info!("{}: processed {} -> {}", self.job, id, outcome_ref);
                state.items_processed += 1;
                if let Err(e) = self.dedup.mark_processed(id, &outcome_ref) {
                    log::error!("{}: {} succeeded but could not be marked: {}", self.job, id, e);
                    state.record_error(id, ErrorKind::Storage, e.to_string());
                    self.park_unconfirmed(id);
                }
            }
            Err(err) => self.settle_failure(state, item, invoker, err).await,
        }
    }

    /// Push the retry count of a sent but unmarked item to the cutoff so later
    /// runs leave it alone instead of sending it again.
    fn park_unconfirmed(&self, id: &str) {
        let current = match self.dedup.get(id) {
            Ok(record) => record.map(|r| r.retry_count).unwrap_or(0),
            Err(e) => {
                log::warn!("{}: could not read {} to park it: {}", self.job, id, e);
                0
            }
        };
        for _ in current..self.config.max_item_retries.max(1) {
            if let Err(e) = self.dedup.increment_retry(id) {
                log::error!("{}: could not park {}, a later run may send it again: {}", self.job, id, e);
                return;
            }
        }
        log::warn!("{}: parked {} until its outcome is confirmed", self.job, id);
    }

    /// Decide whether a terminal failure really failed, then record it.
    async fn settle_failure(
        &self,
        state: &mut RunState,
        item: &ProcessableItem,
        invoker: &dyn ActionInvoker,
        err: RetryError,
    ) {
        let id = &item.external_id;

        if err.is_reconcilable() {
            if let Ok(true) = self.dedup.is_processed(id) {
                log::info!("{}: {} was completed elsewhere", self.job, id);
                state.items_reconciled += 1;
                return;
            }

            match invoker.reconcile(item).await {
                Ok(Some(outcome_ref)) => {
                    log::info!("{}: {} took effect despite {} -> {}", self.job, id, err, outcome_ref);
                    state.items_processed += 1;
                    state.items_reconciled += 1;
                    if let Err(e) = self.dedup.mark_processed(id, &outcome_ref) {
                        state.record_error(id, ErrorKind::Storage, e.to_string());
                        self.park_unconfirmed(id);
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => log::debug!("{}: reconcile for {} failed: {}", self.job, id, e),
            }
        }

        if let Err(e) = self.dedup.increment_retry(id) {
            log::warn!("{}: failed to bump retry count for {}: {}", self.job, id, e);
        }
        state.record_error(id, err.kind(), err.to_string());
    }
}

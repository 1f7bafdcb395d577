//! Per-run bookkeeping for the batch runner.
//!
//! A `RunState` lives for exactly one pass. At the end it is folded into a
//! serializable `RunSummary` that goes to the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::outcome::ErrorKind;
use crate::id::generate_run_id;

/// Phases of a batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Fetching,
    ItemLoop,
    Draining,
    Done,
}

impl RunPhase {
    /// Legal forward transitions. `ItemLoop -> Fetching` covers multi-page runs.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Idle, RunPhase::Fetching)
                | (RunPhase::Idle, RunPhase::Draining)
                | (RunPhase::Fetching, RunPhase::ItemLoop)
                | (RunPhase::Fetching, RunPhase::Draining)
                | (RunPhase::ItemLoop, RunPhase::Fetching)
                | (RunPhase::ItemLoop, RunPhase::Draining)
                | (RunPhase::Draining, RunPhase::Done)
        )
    }
}

/// Why the item loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxItems,
    Deadline,
    SourceExhausted,
    /// Soft stop: the write window has no budget left
    RateLimitExhausted,
    /// The page cap was reached while the source still had more
    MaxPages,
    /// The candidate source failed to return a page
    FetchFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::MaxItems => "max items reached",
            StopReason::Deadline => "deadline reached",
            StopReason::SourceExhausted => "source exhausted",
            StopReason::RateLimitExhausted => "rate limit window exhausted",
            StopReason::MaxPages => "page limit reached",
            StopReason::FetchFailed => "fetch failed",
        };
        write!(f, "{}", s)
    }
}

/// One failed item in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub external_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Mutable state for one batch pass.
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub job: String,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub deadline: Instant,
    pub items_seen: usize,
    pub items_processed: usize,
    pub items_skipped: usize,
    pub items_skipped_retry_limit: usize,
    pub items_reconciled: usize,
    pub pages_fetched: usize,
    pub errors: Vec<ItemError>,
    pub stop_reason: Option<StopReason>,
}

impl RunState {
    /// Start a run now with the given maximum duration.
    pub fn start(job: impl Into<String>, max_duration: Duration) -> Self {
        let started = Instant::now();
        Self {
            run_id: generate_run_id(),
            job: job.into(),
            phase: RunPhase::Idle,
            started_at: Utc::now(),
            started,
            deadline: started + max_duration,
            items_seen: 0,
            items_processed: 0,
            items_skipped: 0,
            items_skipped_retry_limit: 0,
            items_reconciled: 0,
            pages_fetched: 0,
            errors: Vec::new(),
            stop_reason: None,
        }
    }

    /// Move to `next`, logging illegal transitions instead of panicking.
    pub fn transition(&mut self, next: RunPhase) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            log::warn!(
                "run {}: unexpected phase transition {:?} -> {:?}",
                self.run_id,
                self.phase,
                next
            );
        }
        log::debug!("run {}: {:?} -> {:?}", self.run_id, self.phase, next);
        self.phase = next;
    }

    pub fn past_deadline(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record_error(&mut self, external_id: &str, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(ItemError {
            external_id: external_id.to_string(),
            kind,
            message: message.into(),
        });
    }

    /// Set the stop reason once; the first cause wins.
    pub fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }

    pub fn summarize(&self, dry_run: bool) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            job: self.job.clone(),
            started_at: self.started_at,
            elapsed_ms: self.elapsed().as_millis() as u64,
            items_seen: self.items_seen,
            items_processed: self.items_processed,
            items_skipped: self.items_skipped,
            items_skipped_retry_limit: self.items_skipped_retry_limit,
            items_reconciled: self.items_reconciled,
            pages_fetched: self.pages_fetched,
            errors: self.errors.clone(),
            stop_reason: self.stop_reason.unwrap_or(StopReason::SourceExhausted),
            dry_run,
        }
    }
}

/// Structured summary flushed to the audit log at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub items_seen: usize,
    pub items_processed: usize,
    pub items_skipped: usize,
    pub items_skipped_retry_limit: usize,
    pub items_reconciled: usize,
    pub pages_fetched: usize,
    pub errors: Vec<ItemError>,
    pub stop_reason: StopReason,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// One-line operator summary.
    pub fn headline(&self) -> String {
        format!(
            "{}{}: processed {}, skipped {}, errors {}, elapsed {:.1}s ({})",
            self.job,
            if self.dry_run { " [dry-run]" } else { "" },
            self.items_processed,
            self.items_skipped + self.items_skipped_retry_limit,
            self.errors.len(),
            self.elapsed_ms as f64 / 1000.0,
            self.stop_reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(RunPhase::Idle.can_transition_to(RunPhase::Fetching));
        assert!(RunPhase::Fetching.can_transition_to(RunPhase::ItemLoop));
        assert!(RunPhase::ItemLoop.can_transition_to(RunPhase::Fetching));
        assert!(RunPhase::ItemLoop.can_transition_to(RunPhase::Draining));
        assert!(RunPhase::Draining.can_transition_to(RunPhase::Done));
        assert!(!RunPhase::Done.can_transition_to(RunPhase::Fetching));
        assert!(!RunPhase::Idle.can_transition_to(RunPhase::ItemLoop));
    }

    #[tokio::test]
    async fn test_run_state_start() {
        let state = RunState::start("reply-bot", Duration::from_secs(60));
        assert_eq!(state.phase, RunPhase::Idle);
        assert_eq!(state.items_processed, 0);
        assert!(state.errors.is_empty());
        assert!(!state.past_deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_state_deadline() {
        let state = RunState::start("reply-bot", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(state.past_deadline());
    }

    #[tokio::test]
    async fn test_first_stop_reason_wins() {
        let mut state = RunState::start("job", Duration::from_secs(1));
        state.stop(StopReason::MaxItems);
        state.stop(StopReason::Deadline);
        assert_eq!(state.stop_reason, Some(StopReason::MaxItems));
    }

    #[tokio::test]
    async fn test_summary_counts_errors() {
        let mut state = RunState::start("job", Duration::from_secs(1));
        state.items_processed = 2;
        state.record_error("item2", ErrorKind::Fatal, "nope");
        state.stop(StopReason::SourceExhausted);

        let summary = state.summarize(false);
        assert_eq!(summary.items_processed, 2);
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.errors[0].external_id, "item2");
        assert!(summary.headline().contains("processed 2"));
        assert!(summary.headline().contains("errors 1"));
    }
}

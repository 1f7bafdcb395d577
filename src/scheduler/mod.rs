//! Cron-driven task scheduler.
//!
//! Jobs are registered up front, then [`Scheduler::start`] arms one ticker per
//! job. Each ticker sleeps until the next cron fire time and hands the body to
//! [`Scheduler::execute_task`]'s single-flight path:
//!
//! - at most one execution per job name at a time; overlapping fires are
//!   skipped and logged
//! - a failing or panicking body is logged and audited, never propagated
//! - the running flag is cleared on every exit path
//!
//! [`Scheduler::run_once`] executes jobs synchronously for dry runs.

mod job;
mod schedule;

pub use job::{Job, JobContext, JobFn, JobFuture, JobSelector, TaskOutcome};
pub use schedule::{CronSchedule, normalize};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::audit::{AuditEntry, AuditKind, AuditSink, LogAuditSink, record_quietly};
use crate::error::{DuckyError, Result};

/// Lag behind the wall clock tolerated before a ticker resyncs.
const CLOCK_SLACK_MS: i64 = 1_000;

/// One registered job plus its single-flight flag.
struct Slot {
    job: Job,
    running: AtomicBool,
}

/// Clears the running flag when dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Row of the operator job table.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    /// 1-based position in registration order
    pub index: usize,
    pub name: String,
    pub cron_expression: String,
    pub schedule: String,
    pub description: String,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    slots: Vec<Arc<Slot>>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink))
    }
}

impl Scheduler {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            slots: Vec::new(),
            audit,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Add a job. Names are unique.
    pub fn register(&mut self, job: Job) -> Result<()> {
        if self.slots.iter().any(|s| s.job.name() == job.name()) {
            log::error!("Job {} is already registered", job.name());
            return Err(DuckyError::DuplicateJob(job.name().to_string()));
        }
        log::info!(
            "Added task: {} ({}) - {}",
            job.name(),
            job.cron_expression(),
            job.schedule().describe()
        );
        self.slots.push(Arc::new(Slot {
            job,
            running: AtomicBool::new(false),
        }));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.job.name()).collect()
    }

    /// Whether the named job is executing right now.
    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.find(name).map(|s| s.running.load(Ordering::SeqCst))
    }

    fn find(&self, name: &str) -> Option<&Arc<Slot>> {
        self.slots.iter().find(|s| s.job.name() == name)
    }

    fn select(&self, selector: &JobSelector) -> Result<&Arc<Slot>> {
        match selector {
            JobSelector::Index(n) if *n >= 1 && *n <= self.slots.len() => Ok(&self.slots[*n - 1]),
            JobSelector::Index(n) => Err(DuckyError::UnknownJob(format!(
                "#{} (valid range 1-{})",
                n,
                self.slots.len()
            ))),
            JobSelector::Name(name) => self
                .find(name)
                .ok_or_else(|| DuckyError::UnknownJob(name.clone())),
        }
    }

    /// Arm every job's cron trigger and return immediately.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("Scheduler already started");
            return;
        }

        for slot in &self.slots {
            let slot = slot.clone();
            let audit = self.audit.clone();
            let cancel = self.cancel.clone();
            let tracker = self.tracker.clone();
            self.tracker.spawn(Self::tick(slot, audit, cancel, tracker));
        }
        log::info!("Scheduler started with {} jobs", self.slots.len());
    }

    /// Ticker for one job: sleep until the next fire time, spawn the body, repeat.
    async fn tick(slot: Arc<Slot>, audit: Arc<dyn AuditSink>, cancel: CancellationToken, tracker: TaskTracker) {
        let name = slot.job.name().to_string();
        // Wall-clock cursor and the tokio instant it corresponds to
        let mut after = Utc::now();
        let mut base = Instant::now();

        loop {
            let Some(next) = slot.job.schedule().next_after(after) else {
                log::warn!("{}: schedule has no future fire times, disarming", name);
                return;
            };
            let fire_at = base + (next - after).to_std().unwrap_or(Duration::ZERO);
            log::debug!("{}: next run at {}", name, next);

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("{}: trigger cancelled", name);
                    return;
                }
                _ = tokio::time::sleep_until(fire_at) => {}
            }

            // Fire without blocking the ticker so overlaps reach the single-flight check
            tracker.spawn(Self::run_slot(slot.clone(), audit.clone(), JobContext::default()));

            let now = Utc::now();
            if now > next + chrono::TimeDelta::milliseconds(CLOCK_SLACK_MS) {
                // Fell behind the wall clock (suspend, clock jump); resync
                after = now;
                base = Instant::now();
            } else {
                after = next;
                base = fire_at;
            }
        }
    }

    /// Execute the named job now, honoring single-flight.
    pub async fn execute_task(&self, name: &str, ctx: JobContext) -> Result<TaskOutcome> {
        let slot = self
            .find(name)
            .cloned()
            .ok_or_else(|| DuckyError::UnknownJob(name.to_string()))?;
        Ok(Self::run_slot(slot, self.audit.clone(), ctx).await)
    }

    async fn run_slot(slot: Arc<Slot>, audit: Arc<dyn AuditSink>, ctx: JobContext) -> TaskOutcome {
        let name = slot.job.name().to_string();

        if slot.running.swap(true, Ordering::SeqCst) {
            log::warn!("Task {} is already running, skipping", name);
            record_quietly(
                audit.as_ref(),
                &AuditEntry::new(&name, AuditKind::JobSkipped, "previous execution still running"),
            );
            return TaskOutcome::Skipped;
        }
        let _guard = RunningGuard(&slot.running);

        log::info!("Running task: {}{}", name, if ctx.dry_run { " (dry run)" } else { "" });
        let started = Instant::now();

        // A separate task keeps a panicking body from taking the caller down
        let outcome = match tokio::spawn(slot.job.invoke(ctx)).await {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => TaskOutcome::Failed(
                e.chain().map(|c| c.to_string()).collect::<Vec<_>>().join(": "),
            ),
            Err(e) if e.is_panic() => TaskOutcome::Failed("task panicked".to_string()),
            Err(e) => TaskOutcome::Failed(format!("task aborted: {}", e)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let entry = match &outcome {
            TaskOutcome::Failed(message) => {
                log::error!("Error in task {}: {}", name, message);
                AuditEntry::new(&name, AuditKind::JobFailed, message.clone())
            }
            _ => {
                log::info!("Task {} completed in {}ms", name, elapsed_ms);
                AuditEntry::new(&name, AuditKind::JobCompleted, format!("completed in {}ms", elapsed_ms))
            }
        };
        record_quietly(
            audit.as_ref(),
            &entry.with_data(serde_json::json!({ "elapsed_ms": elapsed_ms, "dry_run": ctx.dry_run })),
        );

        outcome
    }

    /// Run jobs synchronously once: the selected one, or all in registration order.
    pub async fn run_once(
        &self,
        selector: Option<&JobSelector>,
        ctx: JobContext,
    ) -> Result<Vec<(String, TaskOutcome)>> {
        let slots: Vec<Arc<Slot>> = match selector {
            Some(selector) => vec![self.select(selector)?.clone()],
            None => self.slots.clone(),
        };

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let name = slot.job.name().to_string();
            let outcome = Self::run_slot(slot, self.audit.clone(), ctx).await;
            outcomes.push((name, outcome));
        }
        Ok(outcomes)
    }

    /// Stop arming triggers. Executions already in flight keep running.
    pub fn stop_all(&self) {
        self.cancel.cancel();
        self.tracker.close();
        log::info!("Stopped all scheduled tasks");
    }

    /// Stop triggers and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        self.stop_all();
        self.tracker.wait().await;
        log::info!("All in-flight tasks finished");
    }

    /// Job table in registration order.
    pub fn describe_jobs(&self) -> Vec<JobDescription> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| JobDescription {
                index: i + 1,
                name: slot.job.name().to_string(),
                cron_expression: slot.job.cron_expression().to_string(),
                schedule: slot.job.schedule().describe(),
                description: slot.job.description().to_string(),
                next_run: slot.job.schedule().next_fire(),
            })
            .collect()
    }
}

//! Job definitions for the scheduler.

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use super::schedule::CronSchedule;
use crate::error::Result;

/// Per-invocation flags handed to a job body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobContext {
    /// Run without side effects
    pub dry_run: bool,
}

pub type JobFuture = BoxFuture<'static, eyre::Result<()>>;

/// Type-erased job entry point.
pub type JobFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// A named unit of scheduled work.
#[derive(Clone)]
pub struct Job {
    name: String,
    description: String,
    schedule: CronSchedule,
    entry: JobFn,
}

impl Job {
    /// Create a job, validating the cron expression.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        cron_expression: &str,
        description: impl Into<String>,
        entry: F,
    ) -> Result<Self>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let entry: JobFn = Arc::new(move |ctx| Box::pin(entry(ctx)));
        Ok(Self {
            name: name.into(),
            description: description.into(),
            schedule: CronSchedule::parse(cron_expression)?,
            entry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn cron_expression(&self) -> &str {
        self.schedule.expression()
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub(crate) fn invoke(&self, ctx: JobContext) -> JobFuture {
        (self.entry)(ctx)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("cron", &self.schedule.expression())
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Result of one `execute_task` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Body returned an error or panicked
    Failed(String),
    /// A previous execution was still running
    Skipped,
}

impl TaskOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
}

/// Picks a job by 1-based position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    Index(usize),
    Name(String),
}

impl FromStr for JobSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().parse::<usize>() {
            Ok(n) => JobSelector::Index(n),
            Err(_) => JobSelector::Name(s.trim().to_string()),
        })
    }
}

impl fmt::Display for JobSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSelector::Index(n) => write!(f, "#{}", n),
            JobSelector::Name(name) => write!(f, "{}", name),
        }
    }
}

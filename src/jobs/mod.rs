//! Scheduler jobs assembled from configuration.
//!
//! A configured job runs one batch pass per search query against its
//! candidate source, sharing a single item budget and deadline across the
//! passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::audit::AuditSink;
use crate::batch::{ActionInvoker, BatchRunner, CandidateSource};
use crate::config::{Config, JobConfig};
use crate::dedup::DedupStore;
use crate::domain::{RunSummary, StopReason};
use crate::error::{DuckyError, Result};
use crate::http::{HttpActionInvoker, HttpCandidateSource};
use crate::ratelimit::{RateLimiter, RateLimiters};
use crate::retry::RetryPolicy;
use crate::scheduler::{Job, JobContext};

/// Builds the candidate source for one query (`None` for an unfiltered pass).
pub type SourceFactory = Arc<dyn Fn(Option<&str>) -> Arc<dyn CandidateSource> + Send + Sync>;

/// Shared collaborators every configured job draws on.
#[derive(Clone)]
pub struct JobDeps {
    pub dedup: Arc<dyn DedupStore>,
    pub limiters: RateLimiters,
    pub retry: RetryPolicy,
    pub audit: Arc<dyn AuditSink>,
    pub http_timeout: Duration,
}

/// One job from the config file, bound to its collaborators.
pub struct ConfiguredJob {
    config: JobConfig,
    dedup: Arc<dyn DedupStore>,
    write_limiter: Arc<RateLimiter>,
    fetch_limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
    sources: SourceFactory,
    invoker: Arc<dyn ActionInvoker>,
}

impl ConfiguredJob {
    /// Bind a job to the HTTP adapters. Tokens are read from the environment;
    /// with `require_credentials` unset a missing token becomes empty, which
    /// is enough for listing jobs.
    pub fn http(config: JobConfig, deps: &JobDeps, require_credentials: bool) -> Result<Self> {
        let source_token = read_token(&config.source.token_env, require_credentials)?;
        let action_token = read_token(&config.action.token_env, require_credentials)?;

        let template = HttpCandidateSource::new(config.source.url.clone(), source_token, deps.http_timeout)?;
        let sources: SourceFactory = Arc::new(move |query: Option<&str>| {
            let source = match query {
                Some(q) => template.clone().with_query(q),
                None => template.clone(),
            };
            Arc::new(source) as Arc<dyn CandidateSource>
        });

        let mut invoker = HttpActionInvoker::new(config.action.url.clone(), action_token, deps.http_timeout)?;
        if let Some(url) = &config.action.reconcile_url {
            invoker = invoker.with_reconcile_url(url.clone());
        }

        Self::with_collaborators(config, deps, sources, Arc::new(invoker))
    }

    pub fn with_collaborators(
        config: JobConfig,
        deps: &JobDeps,
        sources: SourceFactory,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Result<Self> {
        let write_limiter = deps.limiters.get(&config.write_class)?;
        let fetch_limiter = match &config.fetch_class {
            Some(class) => Some(deps.limiters.get(class)?),
            None => None,
        };
        Ok(Self {
            config,
            dedup: Arc::clone(&deps.dedup),
            write_limiter,
            fetch_limiter,
            retry: deps.retry,
            audit: Arc::clone(&deps.audit),
            sources,
            invoker,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn queries(&self) -> Vec<Option<&str>> {
        if self.config.source.queries.is_empty() {
            vec![None]
        } else {
            self.config.source.queries.iter().map(|q| Some(q.as_str())).collect()
        }
    }

    /// Run every pass once. Fails only when no pass could fetch anything.
    pub async fn run(&self, ctx: JobContext) -> eyre::Result<Vec<RunSummary>> {
        let batch = &self.config.batch;
        let started = Instant::now();
        let max_run_time = Duration::from_millis(batch.max_run_time_ms);
        let mut summaries = Vec::new();
        let mut processed = 0usize;

        for query in self.queries() {
            let remaining_items = batch.max_items_per_run.saturating_sub(processed);
            let remaining_time = max_run_time.saturating_sub(started.elapsed());
            if remaining_items == 0 || remaining_time.is_zero() {
                log::info!("{}: run budget spent, skipping remaining queries", self.config.name);
                break;
            }

            let mut pass_config = batch.to_batch_config(self.config.source.page_size, ctx.dry_run);
            pass_config.max_items_per_run = remaining_items;
            pass_config.max_run_time = remaining_time;

            let mut runner = BatchRunner::new(
                self.config.name.clone(),
                pass_config,
                Arc::clone(&self.dedup),
                Arc::clone(&self.write_limiter),
                self.retry,
                Arc::clone(&self.audit),
            );
            if let Some(limiter) = &self.fetch_limiter {
                runner = runner.with_fetch_limiter(Arc::clone(limiter));
            }

            if let Some(q) = query {
                log::info!("{}: searching '{}'", self.config.name, q);
            }
            let source = (self.sources)(query);
            let summary = runner.run(source.as_ref(), self.invoker.as_ref()).await;
            processed += summary.items_processed;

            let stop = summary.stop_reason;
            summaries.push(summary);
            if matches!(stop, StopReason::RateLimitExhausted | StopReason::Deadline) {
                break;
            }
        }

        if !summaries.is_empty() && summaries.iter().all(|s| s.stop_reason == StopReason::FetchFailed) {
            eyre::bail!("every candidate fetch failed ({} passes)", summaries.len());
        }
        Ok(summaries)
    }

    /// Wrap the job for the scheduler.
    pub fn into_job(self) -> Result<Job> {
        let name = self.config.name.clone();
        let cron = self.config.cron.clone();
        let description = self.config.description.clone();
        let this = Arc::new(self);
        Job::new(name, &cron, description, move |ctx| {
            let this = Arc::clone(&this);
            async move { this.run(ctx).await.map(|_| ()) }
        })
    }
}

fn read_token(var: &str, required: bool) -> Result<String> {
    match std::env::var(var) {
        Ok(token) if !token.trim().is_empty() => Ok(token),
        _ if required => Err(DuckyError::MissingCredential(var.to_string())),
        _ => Ok(String::new()),
    }
}

/// Build HTTP-backed scheduler jobs for every configured job.
pub fn build_jobs(config: &Config, deps: &JobDeps, require_credentials: bool) -> Result<Vec<Job>> {
    config
        .jobs
        .iter()
        .map(|job| ConfiguredJob::http(job.clone(), deps, require_credentials)?.into_job())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::batch::fakes::{ScriptedInvoker, VecCandidateSource};
    use crate::config::{ActionConfig, BatchSection, SourceConfig};
    use crate::dedup::MemoryDedupStore;
    use crate::domain::{ActionError, ProcessableItem};
    use crate::ratelimit::RateLimitConfig;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::collections::HashMap;

    fn job_config(queries: &[&str], max_items: usize) -> JobConfig {
        JobConfig {
            name: "reply-bot".to_string(),
            cron: "*/30 * * * *".to_string(),
            description: "Reply to mentions".to_string(),
            source: SourceConfig {
                url: "http://localhost/search".to_string(),
                token_env: "DUCKY_JOBS_TEST_SEARCH".to_string(),
                page_size: 20,
                queries: queries.iter().map(|q| q.to_string()).collect(),
            },
            action: ActionConfig {
                url: "http://localhost/reply".to_string(),
                token_env: "DUCKY_JOBS_TEST_WRITE".to_string(),
                reconcile_url: None,
            },
            write_class: "write".to_string(),
            fetch_class: None,
            batch: BatchSection {
                max_items_per_run: max_items,
                batch_delay_ms: 0,
                ..BatchSection::default()
            },
        }
    }

    fn deps(dedup: Arc<MemoryDedupStore>, audit: Arc<MemoryAuditSink>) -> JobDeps {
        let mut configs = HashMap::new();
        configs.insert("write".to_string(), RateLimitConfig::new(0, 100, 60_000));
        JobDeps {
            dedup,
            limiters: RateLimiters::from_configs(&configs).unwrap(),
            retry: RetryPolicy::new(RetryConfig::linear(2, Duration::from_millis(10))),
            audit,
            http_timeout: Duration::from_secs(5),
        }
    }

    fn items(prefix: &str, n: usize) -> Vec<ProcessableItem> {
        (0..n)
            .map(|i| ProcessableItem::new(format!("{}-{}", prefix, i), json!({})))
            .collect()
    }

    /// One fake source per query, keyed by the query text.
    fn per_query_sources(by_query: Vec<(&'static str, Vec<ProcessableItem>)>) -> SourceFactory {
        let map: HashMap<&'static str, Vec<ProcessableItem>> = by_query.into_iter().collect();
        Arc::new(move |query: Option<&str>| {
            let items = query.and_then(|q| map.get(q)).cloned().unwrap_or_default();
            Arc::new(VecCandidateSource::single(items)) as Arc<dyn CandidateSource>
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_pass_per_query() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup.clone(), audit.clone());
        let sources = per_query_sources(vec![("a", items("a", 2)), ("b", items("b", 3))]);
        let invoker = Arc::new(ScriptedInvoker::new());

        let job = ConfiguredJob::with_collaborators(job_config(&["a", "b"], 30), &deps, sources, invoker.clone()).unwrap();
        let summaries = job.run(JobContext::default()).await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].items_processed, 2);
        assert_eq!(summaries[1].items_processed, 3);
        assert_eq!(invoker.performed().len(), 5);
        assert_eq!(dedup.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_budget_shared_across_queries() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup, audit);
        let sources = per_query_sources(vec![("a", items("a", 3)), ("b", items("b", 3)), ("c", items("c", 3))]);
        let invoker = Arc::new(ScriptedInvoker::new());

        let job =
            ConfiguredJob::with_collaborators(job_config(&["a", "b", "c"], 4), &deps, sources, invoker.clone()).unwrap();
        let summaries = job.run(JobContext::default()).await.unwrap();

        // 3 from "a", 1 from "b", "c" never runs
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].items_processed, 1);
        assert_eq!(summaries[1].stop_reason, StopReason::MaxItems);
        assert_eq!(invoker.performed().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfiltered_pass_without_queries() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup, audit);
        let seen_queries = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen_queries);
        let sources: SourceFactory = Arc::new(move |query: Option<&str>| {
            recorder.lock().unwrap().push(query.map(str::to_string));
            Arc::new(VecCandidateSource::single(items("x", 1))) as Arc<dyn CandidateSource>
        });

        let job =
            ConfiguredJob::with_collaborators(job_config(&[], 30), &deps, sources, Arc::new(ScriptedInvoker::new())).unwrap();
        let summaries = job.run(JobContext::default()).await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(*seen_queries.lock().unwrap(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_flag_reaches_runner() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup.clone(), audit);
        let sources = per_query_sources(vec![("a", items("a", 2))]);
        let invoker = Arc::new(ScriptedInvoker::new());

        let job = ConfiguredJob::with_collaborators(job_config(&["a"], 30), &deps, sources, invoker.clone()).unwrap();
        let summaries = job.run(JobContext { dry_run: true }).await.unwrap();

        assert!(summaries[0].dry_run);
        assert!(invoker.performed().is_empty());
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fetches_failing_fails_job() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup, audit);
        let sources: SourceFactory = Arc::new(|_query: Option<&str>| {
            Arc::new(VecCandidateSource::failing(ActionError::fatal("401 unauthorized"))) as Arc<dyn CandidateSource>
        });

        let job =
            ConfiguredJob::with_collaborators(job_config(&["a"], 30), &deps, sources, Arc::new(ScriptedInvoker::new())).unwrap();
        let err = job.run(JobContext::default()).await.unwrap_err();
        assert!(err.to_string().contains("every candidate fetch failed"));
    }

    #[test]
    fn test_unknown_write_class() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup, audit);
        let mut config = job_config(&[], 30);
        config.write_class = "post".to_string();

        let result = ConfiguredJob::with_collaborators(
            config,
            &deps,
            per_query_sources(vec![]),
            Arc::new(ScriptedInvoker::new()),
        );
        assert!(matches!(result, Err(DuckyError::InvalidConfig(_))));
    }

    #[test]
    fn test_http_job_requires_credentials() {
        let dedup = Arc::new(MemoryDedupStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let deps = deps(dedup, audit);
        let mut config = job_config(&[], 30);
        config.source.token_env = "DUCKY_JOBS_TEST_UNSET_TOKEN".to_string();

        let result = ConfiguredJob::http(config.clone(), &deps, true);
        assert!(matches!(result, Err(DuckyError::MissingCredential(_))));

        // Listing only needs the schedule
        let job = ConfiguredJob::http(config, &deps, false).unwrap().into_job().unwrap();
        assert_eq!(job.name(), "reply-bot");
        assert_eq!(job.cron_expression(), "*/30 * * * *");
    }
}

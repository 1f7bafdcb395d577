use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::table::{outcome_line, print_job_table};
use cli::{Cli, Mode};
use ducky::audit::{AuditSink, LogAuditSink, TeeAuditSink};
use ducky::config::Config;
use ducky::jobs::{JobDeps, build_jobs};
use ducky::ratelimit::{RateLimiters, WindowStore};
use ducky::retry::RetryPolicy;
use ducky::scheduler::Scheduler;
use ducky::store::SqliteStore;

fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ducky")
        .join("logs")
        .join("ducky.log")
}

fn setup_logging(log_file: &Path, default_level: &str) -> Result<()> {
    if let Some(log_dir) = log_file.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_scheduler(config: &Config, require_credentials: bool) -> Result<Scheduler> {
    let store = Arc::new(SqliteStore::open(&config.storage.db_path).context("Failed to open database")?);
    info!("Using database at {}", config.storage.db_path.display());

    let window_store: Arc<dyn WindowStore> = store.clone();
    let limiters = RateLimiters::from_configs_with_store(&config.rate_limit_configs(), window_store)
        .context("Failed to build rate limiters")?;

    let store_audit: Arc<dyn AuditSink> = store.clone();
    let audit: Arc<dyn AuditSink> = Arc::new(TeeAuditSink::new(vec![store_audit, Arc::new(LogAuditSink)]));
    let deps = JobDeps {
        dedup: store,
        limiters,
        retry: RetryPolicy::new(config.retry.to_retry_config()),
        audit: audit.clone(),
        http_timeout: Duration::from_millis(config.http.timeout_ms),
    };

    let mut scheduler = Scheduler::new(audit);
    for job in build_jobs(config, &deps, require_credentials).context("Failed to build jobs")? {
        scheduler.register(job)?;
    }
    Ok(scheduler)
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    config.validate().context("Invalid configuration")?;
    let mode = cli.mode();
    if mode != Mode::List {
        config.check_credentials()?;
    }

    let scheduler = build_scheduler(config, mode != Mode::List)?;

    match mode {
        Mode::List => {
            print_job_table(&scheduler.describe_jobs());
        }
        Mode::Once(ref selector) | Mode::DryRun(ref selector) => {
            if matches!(mode, Mode::DryRun(_)) {
                println!("{}", "Dry run: no claims, actions or dedup writes".yellow());
            }
            print_job_table(&scheduler.describe_jobs());
            let outcomes = scheduler.run_once(selector.as_ref(), mode.job_context()).await?;
            for (name, outcome) in &outcomes {
                println!("{}", outcome_line(name, outcome));
            }
        }
        Mode::Schedule => {
            if scheduler.is_empty() {
                println!("{}", "No jobs configured, nothing to schedule".yellow());
                return Ok(());
            }
            print_job_table(&scheduler.describe_jobs());
            scheduler.start();
            println!("{} {} jobs, press Ctrl-C to stop", "Scheduled:".green(), scheduler.len());

            wait_for_shutdown_signal().await?;
            println!("{}", "Shutting down, waiting for running jobs...".cyan());
            scheduler.shutdown().await;
            println!("{}", "Stopped".green());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let default_level = if cli.is_verbose() {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    let log_file = cli.log_file.clone().unwrap_or_else(default_log_file);
    setup_logging(&log_file, &default_level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

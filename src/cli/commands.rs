//! CLI definition using clap.
//!
//! Without flags ducky starts every configured job on its schedule and runs
//! until SIGINT/SIGTERM. `--once` runs jobs a single time for real,
//! `--dry-run` runs them once without side effects, `--list` only prints the
//! job table.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use ducky::scheduler::{JobContext, JobSelector};

/// Ducky - cron-driven, rate-limited batch poster for an automated persona
#[derive(Parser, Debug)]
#[command(name = "ducky")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("single_run").args(["dry_run", "once"])))]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs here instead of the data directory
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Run every job once with no claims, actions or dedup writes, then exit
    #[arg(short = 't', long)]
    pub dry_run: bool,

    /// Run every job once for real, then exit
    #[arg(long, visible_alias = "test")]
    pub once: bool,

    /// With --once or --dry-run, only run this job (1-based index or name)
    #[arg(short = 'n', long, value_name = "N|NAME", requires = "single_run")]
    pub task: Option<JobSelector>,

    /// Print the job table and exit
    #[arg(short, long, conflicts_with = "single_run")]
    pub list: bool,
}

/// What the process does after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Schedule,
    Once(Option<JobSelector>),
    DryRun(Option<JobSelector>),
    List,
}

impl Mode {
    /// Context handed to job bodies in the single-run modes.
    pub fn job_context(&self) -> JobContext {
        JobContext {
            dry_run: matches!(self, Mode::DryRun(_)),
        }
    }
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn mode(&self) -> Mode {
        if self.list {
            Mode::List
        } else if self.dry_run {
            Mode::DryRun(self.task.clone())
        } else if self.once {
            Mode::Once(self.task.clone())
        } else {
            Mode::Schedule
        }
    }
}

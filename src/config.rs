use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::error::DuckyError;
use crate::ratelimit::RateLimitConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::scheduler::CronSchedule;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    /// Resource class name to budget. Replaces the defaults when present.
    pub rate_limits: HashMap<String, RateLimitSection>,
    pub retry: RetrySection,
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ducky")
                .join("ducky.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: crate::http::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub min_delay_ms: u64,
    pub max_calls_per_window: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            min_delay_ms: 3000,
            max_calls_per_window: 15,
            window_ms: 900000,
        }
    }
}

impl RateLimitSection {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.min_delay_ms, self.max_calls_per_window, self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub max_rate_limit_waits: u32,
    pub backoff: BackoffKind,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5000,
            rate_limit_cooldown_ms: 900000,
            max_rate_limit_waits: 4,
            backoff: BackoffKind::Linear,
            backoff_multiplier: 2.0,
            max_delay_ms: 300000,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        let backoff = match self.backoff {
            BackoffKind::Linear => Backoff::Linear,
            BackoffKind::Exponential => Backoff::Exponential {
                multiplier: self.backoff_multiplier,
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
        };
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            rate_limit_cooldown: Duration::from_millis(self.rate_limit_cooldown_ms),
            max_rate_limit_waits: self.max_rate_limit_waits,
            backoff,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// One batch pass per query; a single unfiltered pass when empty
    #[serde(default)]
    pub queries: Vec<String>,
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub url: String,
    pub token_env: String,
    #[serde(default)]
    pub reconcile_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub max_items_per_run: usize,
    pub max_run_time_ms: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_item_retries: u32,
    /// 0 means no page limit
    pub max_pages: usize,
    pub stop_when_exhausted: bool,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_items_per_run: 30,
            max_run_time_ms: 2700000,
            batch_size: 5,
            batch_delay_ms: 30000,
            max_item_retries: 3,
            max_pages: 10,
            stop_when_exhausted: true,
        }
    }
}

impl BatchSection {
    pub fn to_batch_config(&self, page_size: usize, dry_run: bool) -> BatchConfig {
        BatchConfig {
            max_items_per_run: self.max_items_per_run,
            max_run_time: Duration::from_millis(self.max_run_time_ms),
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            page_size,
            max_pages: self.max_pages,
            max_item_retries: self.max_item_retries,
            stop_when_exhausted: self.stop_when_exhausted,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub cron: String,
    #[serde(default)]
    pub description: String,
    pub source: SourceConfig,
    pub action: ActionConfig,
    #[serde(default = "default_write_class")]
    pub write_class: String,
    /// Resource class throttling candidate fetches
    #[serde(default)]
    pub fetch_class: Option<String>,
    #[serde(default)]
    pub batch: BatchSection,
}

fn default_write_class() -> String {
    "write".to_string()
}

fn default_rate_limits() -> HashMap<String, RateLimitSection> {
    let mut limits = HashMap::new();
    limits.insert("write".to_string(), RateLimitSection::default());
    limits.insert(
        "search".to_string(),
        RateLimitSection {
            min_delay_ms: 1000,
            max_calls_per_window: 180,
            window_ms: 900000,
        },
    );
    limits
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            http: HttpConfig::default(),
            rate_limits: default_rate_limits(),
            retry: RetrySection::default(),
            jobs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Budgets per resource class.
    pub fn rate_limit_configs(&self) -> HashMap<String, RateLimitConfig> {
        self.rate_limits
            .iter()
            .map(|(class, section)| (class.clone(), section.to_rate_limit_config()))
            .collect()
    }

    /// Semantic checks that YAML parsing cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (class, section) in &self.rate_limits {
            section
                .to_rate_limit_config()
                .validate()
                .map_err(|e| DuckyError::InvalidConfig(format!("rate_limits.{}: {}", class, e)))?;
        }

        if self.retry.max_attempts == 0 {
            return Err(DuckyError::InvalidConfig("retry.max_attempts must be at least 1".to_string()));
        }

        if self.retry.backoff == BackoffKind::Exponential
            && !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0)
        {
            return Err(DuckyError::InvalidConfig(format!(
                "retry.backoff_multiplier must be a finite number >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(DuckyError::DuplicateJob(job.name.clone()));
            }
            CronSchedule::parse(&job.cron)?;

            for class in std::iter::once(&job.write_class).chain(job.fetch_class.as_ref()) {
                if !self.rate_limits.contains_key(class) {
                    return Err(DuckyError::InvalidConfig(format!(
                        "job {}: unknown resource class '{}'",
                        job.name, class
                    )));
                }
            }
            if job.source.page_size == 0 || job.batch.batch_size == 0 {
                return Err(DuckyError::InvalidConfig(format!(
                    "job {}: page_size and batch_size must be at least 1",
                    job.name
                )));
            }
        }
        Ok(())
    }

    /// Every credential environment variable referenced by a job.
    pub fn credential_vars(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self
            .jobs
            .iter()
            .flat_map(|j| [j.source.token_env.as_str(), j.action.token_env.as_str()])
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Fail on the first credential missing from the environment.
    pub fn check_credentials(&self) -> crate::error::Result<()> {
        for var in self.credential_vars() {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {}
                _ => return Err(DuckyError::MissingCredential(var.to_string())),
            }
        }
        Ok(())
    }
}

//! # Backup Configuration Module
//!
//! Provides configuration management for the backup engine.
//!
//! ## Overview
//!
//! A [`BackupConfig`] describes *what* to back up (the backup plan: an
//! all-sites job and any number of project-scoped jobs) and *how* (worker
//! counts, retry budgets, retention horizon, metric naming). It can be loaded
//! from a TOML document or assembled with [`BackupConfigBuilder`]. Both paths
//! end in [`BackupConfig::validate`], which fails fast with actionable
//! messages.
//!
//! Credentials are deliberately absent: hosts authenticate their bridge
//! implementations before handing them to the service.
//!
//! ## Usage
//!
//! ### Loading from TOML
//!
//! ```ignore
//! use core_runtime::config::BackupConfig;
//!
//! let config = BackupConfig::load("/etc/content-backup/config.toml")?;
//! ```
//!
//! ```toml
//! [main]
//! workdir = "/var/tmp/content-backup"
//! max_workers = 6
//!
//! [backup.sites]
//! bucket = "backups-all-sites"
//! excluded_sites = ["Sandbox"]
//!
//! [[backup.projects]]
//! site = "prod"
//! bucket = "backups-finance"
//! projects = ["Finance/Reports"]
//!
//! [retention]
//! staleness_days = 60
//! ```
//!
//! ### Building in code
//!
//! ```
//! use core_runtime::config::BackupConfig;
//!
//! let config = BackupConfig::builder("/tmp/staging")
//!     .max_workers(4)
//!     .all_sites("backups", vec!["Sandbox".to_string()])
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.main.max_workers, 4);
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_WORKERS: usize = 6;
pub const DEFAULT_SWEEP_WORKERS: usize = 10;
pub const DEFAULT_STATE_FILE_NAME: &str = "upload_state.json";
pub const DEFAULT_FIDELITY_OPT_OUT_TAG: &str = "WBBackupIgnoreErrors";
pub const DEFAULT_STALENESS_DAYS: i64 = 60;
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 6;
pub const DEFAULT_STATE_WRITE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_METRIC_PREFIX: &str = "content-backup";

/// Environment variable restricting the all-sites job to a single site
pub const SITE_OVERRIDE_ENV: &str = "BACKUP_SITE_NAME";

/// Complete backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackupConfig {
    pub main: MainConfig,

    #[serde(default)]
    pub backup: BackupPlan,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// General engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MainConfig {
    /// Local staging directory for downloaded artifacts
    pub workdir: PathBuf,

    /// Maximum concurrent item transfers per site
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum concurrent timestamp refreshes during a retention sweep
    #[serde(default = "default_sweep_workers")]
    pub sweep_workers: usize,

    /// Optional deadline for one site run, in seconds
    #[serde(default)]
    pub sync_timeout_secs: Option<u64>,

    /// File name of the per-site state document (`{site}/{state_file_name}`)
    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,

    /// Source tag that lets a degraded-only transfer count as fully synced
    #[serde(default = "default_fidelity_opt_out_tag")]
    pub fidelity_opt_out_tag: String,
}

impl MainConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            max_workers: DEFAULT_MAX_WORKERS,
            sweep_workers: DEFAULT_SWEEP_WORKERS,
            sync_timeout_secs: None,
            state_file_name: DEFAULT_STATE_FILE_NAME.to_string(),
            fidelity_opt_out_tag: DEFAULT_FIDELITY_OPT_OUT_TAG.to_string(),
        }
    }
}

/// The jobs to run, in order: the all-sites job first, then project jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BackupPlan {
    #[serde(default)]
    pub sites: Option<SitesJob>,

    #[serde(default)]
    pub projects: Vec<ProjectJob>,
}

impl BackupPlan {
    pub fn is_empty(&self) -> bool {
        self.sites.is_none() && self.projects.is_empty()
    }
}

/// Back up every site (minus exclusions) into one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SitesJob {
    pub bucket: String,

    #[serde(default)]
    pub excluded_sites: Vec<String>,

    /// When non-empty, only these sites are backed up
    #[serde(default)]
    pub only_sites: Vec<String>,
}

/// Back up selected project subtrees of one site into one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectJob {
    pub site: String,
    pub bucket: String,

    /// Project paths such as `Finance/Reports`; empty means the whole site
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Objects untouched for at least this many days get their timestamp refreshed
    pub staleness_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            staleness_days: DEFAULT_STALENESS_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub transfer_attempts: u32,
    pub state_write_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transfer_attempts: DEFAULT_TRANSFER_ATTEMPTS,
            state_write_attempts: DEFAULT_STATE_WRITE_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prefix of every metric key, e.g. `content-backup.heartbeat`
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_METRIC_PREFIX.to_string(),
        }
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_sweep_workers() -> usize {
    DEFAULT_SWEEP_WORKERS
}

fn default_state_file_name() -> String {
    DEFAULT_STATE_FILE_NAME.to_string()
}

fn default_fidelity_opt_out_tag() -> String {
    DEFAULT_FIDELITY_OPT_OUT_TAG.to_string()
}

impl BackupConfig {
    /// Creates a new builder for constructing a `BackupConfig`.
    pub fn builder(workdir: impl Into<PathBuf>) -> BackupConfigBuilder {
        BackupConfigBuilder::new(workdir)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BackupConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Applies overrides taken from the process environment.
    ///
    /// `BACKUP_SITE_NAME` restricts the all-sites job to that single site.
    pub fn apply_env_overrides(&mut self) {
        self.apply_site_override(std::env::var(SITE_OVERRIDE_ENV).ok());
    }

    /// Restricts the all-sites job to `site` when one is given.
    pub fn apply_site_override(&mut self, site: Option<String>) {
        let Some(site) = site.filter(|s| !s.trim().is_empty()) else {
            return;
        };
        if let Some(job) = self.backup.sites.as_mut() {
            job.only_sites = vec![site];
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.main.workdir.as_os_str().is_empty() {
            return Err(Error::Config("Work directory cannot be empty".to_string()));
        }

        if self.main.max_workers == 0 {
            return Err(Error::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.main.sweep_workers == 0 {
            return Err(Error::Config(
                "sweep_workers must be greater than 0".to_string(),
            ));
        }

        if self.main.sync_timeout_secs == Some(0) {
            return Err(Error::Config(
                "sync_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.main.state_file_name.is_empty() || self.main.state_file_name.contains('/') {
            return Err(Error::Config(format!(
                "Invalid state file name '{}': must be a non-empty name without '/'",
                self.main.state_file_name
            )));
        }

        if self.retry.transfer_attempts == 0 || self.retry.state_write_attempts == 0 {
            return Err(Error::Config(
                "Retry attempt budgets must be at least 1".to_string(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }

        if self.retention.staleness_days < 0 {
            return Err(Error::Config(
                "retention.staleness_days cannot be negative".to_string(),
            ));
        }

        if self.metrics.prefix.is_empty() {
            return Err(Error::Config("Metric prefix cannot be empty".to_string()));
        }

        if self.backup.is_empty() {
            return Err(Error::Config(
                "No backup jobs configured. Add a [backup.sites] section or at least one \
                 [[backup.projects]] entry."
                    .to_string(),
            ));
        }

        if let Some(job) = &self.backup.sites {
            if job.bucket.trim().is_empty() {
                return Err(Error::Config(
                    "backup.sites.bucket cannot be empty".to_string(),
                ));
            }
        }

        for (index, job) in self.backup.projects.iter().enumerate() {
            if job.site.trim().is_empty() {
                return Err(Error::Config(format!(
                    "backup.projects[{}].site cannot be empty",
                    index
                )));
            }
            if job.bucket.trim().is_empty() {
                return Err(Error::Config(format!(
                    "backup.projects[{}].bucket cannot be empty",
                    index
                )));
            }
        }

        Ok(())
    }
}

/// Builder for constructing [`BackupConfig`] instances.
///
/// Call [`build()`](BackupConfigBuilder::build) to validate and obtain the
/// final config.
#[derive(Debug, Clone)]
pub struct BackupConfigBuilder {
    main: MainConfig,
    plan: BackupPlan,
    retention: RetentionConfig,
    retry: RetryConfig,
    metrics: MetricsConfig,
}

impl BackupConfigBuilder {
    fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            main: MainConfig::new(workdir),
            plan: BackupPlan::default(),
            retention: RetentionConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Sets the maximum number of concurrent transfers.
    ///
    /// Default: 6
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.main.max_workers = workers;
        self
    }

    /// Sets the maximum number of concurrent sweep refreshes.
    ///
    /// Default: 10
    pub fn sweep_workers(mut self, workers: usize) -> Self {
        self.main.sweep_workers = workers;
        self
    }

    /// Sets a deadline for each site run.
    pub fn sync_timeout_secs(mut self, secs: u64) -> Self {
        self.main.sync_timeout_secs = Some(secs);
        self
    }

    pub fn state_file_name(mut self, name: impl Into<String>) -> Self {
        self.main.state_file_name = name.into();
        self
    }

    pub fn fidelity_opt_out_tag(mut self, tag: impl Into<String>) -> Self {
        self.main.fidelity_opt_out_tag = tag.into();
        self
    }

    /// Sets the retention horizon in days.
    ///
    /// Default: 60
    pub fn staleness_days(mut self, days: i64) -> Self {
        self.retention.staleness_days = days;
        self
    }

    pub fn transfer_attempts(mut self, attempts: u32) -> Self {
        self.retry.transfer_attempts = attempts;
        self
    }

    pub fn state_write_attempts(mut self, attempts: u32) -> Self {
        self.retry.state_write_attempts = attempts;
        self
    }

    /// Sets the exponential backoff bounds. A zero base disables delays.
    pub fn retry_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.retry.base_delay_ms = base_delay_ms;
        self.retry.max_delay_ms = max_delay_ms;
        self
    }

    pub fn metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics.prefix = prefix.into();
        self
    }

    /// Adds the all-sites job.
    pub fn all_sites(mut self, bucket: impl Into<String>, excluded_sites: Vec<String>) -> Self {
        self.plan.sites = Some(SitesJob {
            bucket: bucket.into(),
            excluded_sites,
            only_sites: Vec::new(),
        });
        self
    }

    /// Adds a project-scoped job.
    pub fn project_job(
        mut self,
        site: impl Into<String>,
        bucket: impl Into<String>,
        projects: Vec<String>,
    ) -> Self {
        self.plan.projects.push(ProjectJob {
            site: site.into(),
            bucket: bucket.into(),
            projects,
        });
        self
    }

    /// Builds and validates the final `BackupConfig`.
    pub fn build(self) -> Result<BackupConfig> {
        let config = BackupConfig {
            main: self.main,
            backup: self.plan,
            retention: self.retention,
            retry: self.retry,
            metrics: self.metrics,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"
[main]
workdir = "/var/tmp/backup"
max_workers = 8
sync_timeout_secs = 7200

[backup.sites]
bucket = "all-sites"
excluded_sites = ["Sandbox", "Archive"]

[[backup.projects]]
site = "prod"
bucket = "finance"
projects = ["Finance/Reports", "Finance/Budgets/"]

[retention]
staleness_days = 30

[retry]
transfer_attempts = 4
base_delay_ms = 0

[metrics]
prefix = "wb-backup"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = BackupConfig::from_toml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.main.workdir, PathBuf::from("/var/tmp/backup"));
        assert_eq!(config.main.max_workers, 8);
        assert_eq!(config.main.sweep_workers, DEFAULT_SWEEP_WORKERS);
        assert_eq!(config.main.sync_timeout_secs, Some(7200));
        assert_eq!(config.main.state_file_name, "upload_state.json");

        let sites = config.backup.sites.as_ref().unwrap();
        assert_eq!(sites.bucket, "all-sites");
        assert_eq!(sites.excluded_sites, vec!["Sandbox", "Archive"]);
        assert!(sites.only_sites.is_empty());

        assert_eq!(config.backup.projects.len(), 1);
        assert_eq!(config.backup.projects[0].projects.len(), 2);

        assert_eq!(config.retention.staleness_days, 30);
        assert_eq!(config.retry.transfer_attempts, 4);
        assert_eq!(config.retry.state_write_attempts, DEFAULT_STATE_WRITE_ATTEMPTS);
        assert_eq!(config.retry.base_delay_ms, 0);
        assert_eq!(config.metrics.prefix, "wb-backup");
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let config = BackupConfig::from_toml_str(
            r#"
[main]
workdir = "/tmp/w"

[[backup.projects]]
site = "prod"
bucket = "b"
"#,
        )
        .unwrap();

        assert_eq!(config.main.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.retention.staleness_days, DEFAULT_STALENESS_DAYS);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.metrics.prefix, DEFAULT_METRIC_PREFIX);
        assert!(config.backup.projects[0].projects.is_empty());
    }

    #[test]
    fn test_missing_workdir_is_rejected() {
        let err = BackupConfig::from_toml_str("[main]\nmax_workers = 2\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_without_jobs_is_rejected() {
        let err = BackupConfig::from_toml_str("[main]\nworkdir = \"/tmp/w\"\n").unwrap_err();
        assert!(err.to_string().contains("No backup jobs configured"));
    }

    #[test]
    fn test_builder_validation() {
        let err = BackupConfig::builder("/tmp/w")
            .max_workers(0)
            .all_sites("b", vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_workers"));

        let err = BackupConfig::builder("/tmp/w")
            .project_job("prod", "", vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("bucket"));

        let err = BackupConfig::builder("/tmp/w")
            .transfer_attempts(0)
            .all_sites("b", vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("attempt"));

        let err = BackupConfig::builder("/tmp/w")
            .state_file_name("nested/state.json")
            .all_sites("b", vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("state file name"));
    }

    #[test]
    fn test_builder_produces_plan() {
        let config = BackupConfig::builder("/tmp/w")
            .all_sites("all", vec!["Sandbox".to_string()])
            .project_job("prod", "finance", vec!["Finance".to_string()])
            .staleness_days(14)
            .retry_delays(0, 0)
            .build()
            .unwrap();

        assert_eq!(config.backup.sites.unwrap().excluded_sites, vec!["Sandbox"]);
        assert_eq!(config.backup.projects[0].site, "prod");
        assert_eq!(config.retention.staleness_days, 14);
        assert_eq!(config.retry.base_delay_ms, 0);
    }

    #[test]
    fn test_site_override() {
        let mut config = BackupConfig::from_toml_str(FULL_CONFIG).unwrap();

        config.apply_site_override(None);
        assert!(config.backup.sites.as_ref().unwrap().only_sites.is_empty());

        config.apply_site_override(Some("prod".to_string()));
        assert_eq!(config.backup.sites.as_ref().unwrap().only_sites, vec!["prod"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = BackupConfig::load(file.path()).unwrap();
        assert_eq!(config.main.max_workers, 8);

        let err = BackupConfig::load("/nonexistent/config.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}

//! Application settings (`config.toml` in the config dir)
//!
//! ```toml
//! backup_dir = "~/winconf-backups"
//! default_policy = "best-effort"
//! jobs = 4
//! keep_runs = 20
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 250
//!
//! [timeouts]
//! software = 900
//! ```
//!
//! Every key is optional; a missing file means defaults throughout.

use crate::paths;
use anyhow::{Context, Result, bail};
use declarative::{FailurePolicy, RetryConfig, RunOptions, Subsystem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";

/// Failure policy as written in config files and on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyArg {
    #[default]
    FailFast,
    BestEffort,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::FailFast => Self::FailFast,
            PolicyArg::BestEffort => Self::BestEffort,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Backup store root; defaults to `<state dir>/backups`
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub default_policy: PolicyArg,
    /// Worker threads for concurrent-safe subsystems
    pub jobs: Option<usize>,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Per-call timeout in seconds, keyed by subsystem name or `default`
    #[serde(default)]
    pub timeouts: BTreeMap<String, u64>,
    /// Runs kept by `backups prune` when `--keep` is not given
    pub keep_runs: Option<usize>,
}

impl AppConfig {
    /// Load `config.toml` from the config dir
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.run_options()?;
        Ok(config)
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        match &self.backup_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::default_backup_dir(),
        }
    }

    pub fn keep_runs(&self) -> usize {
        self.keep_runs.unwrap_or(10)
    }

    /// Engine tuning, starting from the engine's defaults
    pub fn run_options(&self) -> Result<RunOptions> {
        let mut options = RunOptions::default();
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                bail!("jobs must be at least 1");
            }
            options.jobs = jobs;
        }

        let retry = &self.retry;
        options.retry = RetryConfig {
            max_attempts: retry.max_attempts.unwrap_or(options.retry.max_attempts),
            base_delay: retry
                .base_delay_ms
                .map_or(options.retry.base_delay, Duration::from_millis),
            backoff_factor: retry.backoff_factor.unwrap_or(options.retry.backoff_factor),
            max_delay: retry
                .max_delay_ms
                .map_or(options.retry.max_delay, Duration::from_millis),
        };
        if options.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if options.retry.backoff_factor < 1.0 {
            bail!("retry.backoff_factor must be at least 1.0");
        }

        for (name, secs) in &self.timeouts {
            if *secs == 0 {
                bail!("timeouts.{name} must be at least 1 second");
            }
            let timeout = Duration::from_secs(*secs);
            if name == "default" {
                options.default_timeout = timeout;
            } else {
                let subsystem: Subsystem = name
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!("timeouts.{name}: {e}"))?;
                options.timeouts.insert(subsystem, timeout);
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(content: &str) -> AppConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.default_policy, PolicyArg::FailFast);
        assert_eq!(config.keep_runs(), 10);
    }

    #[test]
    fn test_run_options_overrides() {
        let config = parse(
            r#"
            default_policy = "best-effort"
            jobs = 4

            [retry]
            max_attempts = 5
            base_delay_ms = 250

            [timeouts]
            default = 30
            software = 900
            "#,
        );
        assert_eq!(FailurePolicy::from(config.default_policy), FailurePolicy::BestEffort);

        let options = config.run_options().unwrap();
        assert_eq!(options.jobs, 4);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.base_delay, Duration::from_millis(250));
        assert!((options.retry.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(options.timeout_for(Subsystem::Software), Duration::from_secs(900));
        assert_eq!(options.timeout_for(Subsystem::Registry), Duration::from_secs(30));
        // untouched engine default
        assert_eq!(options.timeout_for(Subsystem::Services), Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(parse("jobs = 0").run_options().is_err());
        assert!(parse("[timeouts]\ndns = 10").run_options().is_err());
        assert!(parse("[retry]\nmax_attempts = 0").run_options().is_err());
        assert!(toml::from_str::<AppConfig>("colour = true").is_err());
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[timeouts]\nsoftware = 0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("timeouts.software"));
    }

    #[test]
    fn test_backup_dir_expands() {
        let config = parse(r#"backup_dir = "~/winconf-backups""#);
        let home = dirs::home_dir().unwrap();
        assert_eq!(config.backup_dir().unwrap(), home.join("winconf-backups"));
    }
}

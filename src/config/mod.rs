//! Configuration module
//!
//! Runner and report settings, loaded from YAML or JSON.

mod file;

pub use file::{expand_path, find, render_file_name, CONFIG_LOCATIONS};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::results::DEFAULT_HISTORY_LIMIT;
use file::is_yaml_file;

/// Application configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// How the engine dispatches tests
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Worker count; `None` runs serially
    pub threads: Option<usize>,

    /// Per-test timeout in seconds
    pub timeout_secs: Option<f64>,

    /// Upper bound on waiting for the whole run, in seconds
    pub global_timeout_secs: Option<f64>,

    /// Stop dispatching after the first FAIL or ERROR
    pub fail_fast: bool,

    /// Group by class and honor `order:` markers before running
    pub ensure_sequence: bool,

    /// Pause between serial dispatches, in seconds
    pub interval_secs: Option<f64>,

    /// Run only tests carrying one of these tags
    pub tags: Vec<String>,

    /// Run only tests with `0 <= level <= max`
    pub level: Option<i64>,

    /// File listing the test ids to run, one per line
    pub test_list: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn test_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            anyhow::bail!("threads must be at least 1 (omit it to run serially)");
        }
        for (name, value) in [
            ("timeout_secs", self.timeout_secs),
            ("global_timeout_secs", self.global_timeout_secs),
        ] {
            if let Some(secs) = value {
                if !secs.is_finite() || secs <= 0.0 {
                    anyhow::bail!("{name} must be positive, got {secs}");
                }
            }
        }
        if let Some(secs) = self.interval_secs {
            if !secs.is_finite() || secs < 0.0 {
                anyhow::bail!("interval_secs must not be negative, got {secs}");
            }
        }
        Ok(())
    }
}

/// Where and how reports are written
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,

    /// Report file name; strftime directives are substituted
    pub report_file: String,

    /// Log file name; strftime directives are substituted
    pub log_file: String,

    pub title: String,
    pub description: String,
    pub tester: String,

    /// Defaults to `<output_dir>/history`
    pub history_dir: Option<PathBuf>,

    pub history_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            report_file: "report.html".to_string(),
            log_file: "run.log".to_string(),
            title: "TEST REPORT".to_string(),
            description: String::new(),
            tester: String::new(),
            history_dir: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ReportConfig {
    pub fn history_dir(&self) -> PathBuf {
        self.history_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("history"))
    }

    /// Report file path for a run started at `now`
    pub fn report_path<Tz>(&self, now: &DateTime<Tz>) -> Result<PathBuf, ConfigError>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        Ok(self.output_dir.join(render_file_name(&self.report_file, now)?))
    }

    /// Log file path for a run started at `now`
    pub fn log_path<Tz>(&self, now: &DateTime<Tz>) -> Result<PathBuf, ConfigError>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        Ok(self.output_dir.join(render_file_name(&self.log_file, now)?))
    }

    pub fn validate(&self) -> Result<()> {
        if self.report_file.trim().is_empty() {
            anyhow::bail!("report_file must not be empty");
        }
        if self.log_file.trim().is_empty() {
            anyhow::bail!("log_file must not be empty");
        }
        if self.history_limit == 0 {
            anyhow::bail!("history_limit must be at least 1");
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the first standard location, or defaults
    pub fn load_default() -> Result<Self> {
        match find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.runner.validate().context("Invalid runner settings")?;
        self.report.validate().context("Invalid report settings")?;
        Ok(())
    }

    /// Example configuration written by `config init`
    pub fn example() -> Self {
        Self {
            runner: RunnerConfig {
                threads: Some(4),
                timeout_secs: Some(60.0),
                ensure_sequence: true,
                tags: vec!["smoke".to_string()],
                ..Default::default()
            },
            report: ReportConfig {
                report_file: "report_%Y%m%d_%H%M%S.html".to_string(),
                log_file: "run_%Y%m%d_%H%M%S.log".to_string(),
                description: "Nightly regression".to_string(),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.runner.threads, None);
        assert_eq!(config.report.report_file, "report.html");
        assert_eq!(config.report.title, "TEST REPORT");
        assert_eq!(config.report.history_limit, 10);
        assert_eq!(config.report.history_dir(), PathBuf::from("reports/history"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let config = AppConfig::example();

        for name in ["config.yaml", "nested/config.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(AppConfig::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.yml");
        std::fs::write(&path, "runner:\n  fail_fast: true\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert!(config.runner.fail_fast);
        assert_eq!(config.report, ReportConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.runner.threads = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runner.timeout_secs = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.report.report_file = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_and_log_paths() {
        use chrono::Utc;

        let report = AppConfig::example().report;
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            report.report_path(&now).unwrap(),
            PathBuf::from("reports/report_20240309_140507.html")
        );
        assert_eq!(
            report.log_path(&now).unwrap(),
            PathBuf::from("reports/run_20240309_140507.log")
        );
    }

    #[test]
    fn test_durations() {
        let runner = RunnerConfig {
            timeout_secs: Some(1.5),
            ..Default::default()
        };
        assert_eq!(runner.test_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(runner.global_timeout(), None);
    }
}

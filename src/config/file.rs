//! Configuration file lookup
//!
//! Standard config locations and file-name templating.

use chrono::{DateTime, TimeZone};
use std::fmt::{Display, Write};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./suite-runner.yaml",
    "./suite-runner.yml",
    "./.suite-runner.yaml",
    "~/.config/suite-runner/config.yaml",
];

/// Find a configuration file in the standard locations
pub fn find() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// Substitute strftime directives in a file name template
pub fn render_file_name<Tz>(template: &str, now: &DateTime<Tz>) -> Result<String, ConfigError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut name = String::new();
    write!(name, "{}", now.format(template)).map_err(|_| {
        ConfigError::InvalidConfig(format!("invalid time format in file name '{template}'"))
    })?;
    Ok(name)
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::usage::ledger::DEFAULT_DAILY_LIMIT_SECONDS;
use crate::usage::zone::DayZone;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Usage accounting settings
    #[serde(default)]
    pub usage: UsageSettings,

    /// History retention settings
    #[serde(default)]
    pub retention: RetentionSettings,

    /// Ledger storage settings
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Usage accounting settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UsageSettings {
    /// Cap given to newly created ledgers (seconds per day)
    #[serde(default = "default_daily_limit")]
    pub daily_limit_seconds: i64,

    /// Seconds a heartbeat credits when it does not specify any
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_default_seconds: i64,

    /// Largest credit a single heartbeat may request
    #[serde(default = "default_heartbeat_max")]
    pub heartbeat_max_seconds: i64,

    /// Clock that defines day boundaries
    #[serde(default)]
    pub timezone: DayZone,
}

fn default_daily_limit() -> i64 {
    DEFAULT_DAILY_LIMIT_SECONDS
}

fn default_heartbeat_seconds() -> i64 {
    15
}

fn default_heartbeat_max() -> i64 {
    300
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            daily_limit_seconds: default_daily_limit(),
            heartbeat_default_seconds: default_heartbeat_seconds(),
            heartbeat_max_seconds: default_heartbeat_max(),
            timezone: DayZone::default(),
        }
    }
}

/// History retention settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetentionSettings {
    /// Days of history to keep (0 keeps everything)
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Seconds between pruning passes in the daemon
    #[serde(default = "default_retention_interval")]
    pub interval_seconds: u64,
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_interval() -> u64 {
    3600
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            interval_seconds: default_retention_interval(),
        }
    }
}

/// Ledger storage settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Directory of per-student documents; platform default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Configured data directory or the platform default
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::platform::default_data_dir(),
        }
    }
}

/// Load configuration from YAML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Save configuration to YAML file
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    validate_config(config)?;

    let content = serde_yaml::to_string(config)
        .context("Failed to serialize config to YAML")?;

    crate::platform::atomic_write(path, content.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let usage = &config.usage;

    if usage.daily_limit_seconds < 0 {
        anyhow::bail!(
            "usage.daily_limit_seconds cannot be negative, got {}",
            usage.daily_limit_seconds
        );
    }

    if usage.heartbeat_max_seconds <= 0 {
        anyhow::bail!(
            "usage.heartbeat_max_seconds must be positive, got {}",
            usage.heartbeat_max_seconds
        );
    }

    if usage.heartbeat_default_seconds < 0
        || usage.heartbeat_default_seconds > usage.heartbeat_max_seconds
    {
        anyhow::bail!(
            "usage.heartbeat_default_seconds must be between 0 and {}, got {}",
            usage.heartbeat_max_seconds,
            usage.heartbeat_default_seconds
        );
    }

    if config.retention.interval_seconds == 0 {
        anyhow::bail!("retention.interval_seconds must be positive");
    }

    Ok(())
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");

/// Default location of the config file
pub fn get_config_path() -> Result<PathBuf> {
    crate::platform::default_config_path()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use chrono::FixedOffset;

    #[test]
    fn test_example_config_parses() {
        let config: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        validate_config(&config).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.usage.daily_limit_seconds, 1800);
        assert_eq!(config.usage.heartbeat_default_seconds, 15);
        assert_eq!(config.usage.heartbeat_max_seconds, 300);
        assert_eq!(config.usage.timezone, DayZone::Local);
        assert_eq!(config.retention.days, 30);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = serde_yaml::from_str("usage:\n  daily_limit_seconds: 600\n").unwrap();
        assert_eq!(config.usage.daily_limit_seconds, 600);
        assert_eq!(config.usage.heartbeat_max_seconds, 300);
    }

    #[test]
    fn test_day_zone_yaml() {
        let config: Config = serde_yaml::from_str("usage:\n  timezone: \"+02:00\"\n").unwrap();
        assert_eq!(
            config.usage.timezone,
            DayZone::Fixed(FixedOffset::east_opt(2 * 3600).unwrap())
        );

        assert!(serde_yaml::from_str::<Config>("usage:\n  timezone: nowhere\n").is_err());
    }

    #[test]
    fn test_validate_rejects_negative_limit() {
        let mut config = Config::default();
        config.usage.daily_limit_seconds = -1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_heartbeat_bounds() {
        let mut config = Config::default();
        config.usage.heartbeat_default_seconds = 301;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.usage.heartbeat_max_seconds = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_retention_interval() {
        let mut config = Config::default();
        config.retention.interval_seconds = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("config.yaml");

        let mut config = Config::default();
        config.usage.daily_limit_seconds = 2700;
        config.usage.timezone = DayZone::Utc;
        config.storage.data_dir = Some(PathBuf::from("/tmp/students"));

        save_config(path.path(), &config).unwrap();
        let loaded = load_config(path.path()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_config_or_default_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let config = load_config_or_default(&temp.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("config.yaml");
        path.write_str("usage:\n  daily_limit_seconds: -5\n").unwrap();

        assert!(load_config(path.path()).is_err());
    }
}

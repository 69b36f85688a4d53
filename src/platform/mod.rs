//! Filesystem helpers and platform-specific default locations

pub mod common;

pub use common::{atomic_write, ensure_directory_exists};

use anyhow::Result;
use std::path::PathBuf;

const APP_DIR: &str = "tutor-usage";

/// Default location of the YAML configuration file
pub fn default_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/tutor-usage/config.yaml"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from(
            "/Library/Application Support/tutor-usage/config.yaml",
        ))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData")
                .unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push(APP_DIR);
        path.push("config.yaml");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}

/// Default directory for student ledger documents
///
/// Prefers the system location when it already exists, otherwise the
/// per-user data directory.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let system_dir = PathBuf::from("/var/lib/tutor-usage/students");
        if system_dir.parent().map(|p| p.exists()).unwrap_or(false) {
            return Ok(system_dir);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", APP_DIR) {
        return Ok(dirs.data_local_dir().join("students"));
    }

    anyhow::bail!("Could not determine data directory location");
}

//! Application configuration
//!
//! Loaded from `darkpot.toml` in the platform config directory. A missing
//! file yields the defaults; any field may be omitted.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::engine::EngineConfig;
use crate::error::{AppError, Result};

const CONFIG_FILE: &str = "darkpot.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shared row store
    pub database_path: PathBuf,
    /// Per-process local cache
    pub cache_path: PathBuf,
    /// Relay the peers connect through
    pub relay_addr: SocketAddr,
    /// Port for `darkpot relay`
    pub relay_port: u16,
    pub max_participants: usize,
    pub host_leave_grace_ms: u64,
    pub join_timeout_ms: u64,
    pub cleanup_max_age_secs: u64,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            database_path: data_dir.join("darkpot.db"),
            cache_path: data_dir.join("darkpot-cache.db"),
            relay_addr: SocketAddr::from(([127, 0, 0, 1], darkpot_net::DEFAULT_PORT)),
            relay_port: darkpot_net::DEFAULT_PORT,
            max_participants: 32,
            host_leave_grace_ms: 3000,
            join_timeout_ms: 10_000,
            cleanup_max_age_secs: 300,
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let Some(dirs) = project_dirs() else {
            return Ok(Self::default());
        };
        let path = dirs.config_dir().join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_participants: self.max_participants,
            host_leave_grace: Duration::from_millis(self.host_leave_grace_ms),
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn cleanup_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cleanup_max_age_secs as i64)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "onyx", "darkpot")
}

/// Platform data directory for the databases
pub fn data_dir() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(AppError::NoDataDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_participants, 32);
        assert_eq!(config.host_leave_grace_ms, 3000);
        assert_eq!(config.join_timeout(), Duration::from_secs(10));
        assert_eq!(config.relay_addr.port(), darkpot_net::DEFAULT_PORT);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            relay_addr = "10.0.0.2:9000"
            max_participants = 8
            host_leave_grace_ms = 500
        "#,
        )
        .unwrap();

        assert_eq!(config.relay_addr, "10.0.0.2:9000".parse().unwrap());
        assert_eq!(config.max_participants, 8);
        assert_eq!(config.engine().host_leave_grace, Duration::from_millis(500));
        assert_eq!(config.cleanup_max_age_secs, 300);
    }

    #[test]
    fn test_invalid_toml() {
        let result = AppConfig::from_toml("max_participants = \"many\"");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "log_filter = \"darkpot=debug\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.log_filter, "darkpot=debug");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load_from(&missing),
            Err(AppError::ConfigNotFound(_))
        ));
    }
}

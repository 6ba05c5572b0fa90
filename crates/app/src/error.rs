//! Error types for the darkpot binary

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error(transparent)]
    Core(#[from] darkpot_core::Error),

    #[error(transparent)]
    Net(#[from] darkpot_net::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

//! Error types for Darkpot Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Empty input or missing session/user context. Rejected before any I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Actor lacks the right to perform the operation (host-only, author-only).
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Draw requested while every remaining card is already selected.
    #[error("There are no unselected cards")]
    NoUnselectedCards,

    /// A fenced write observed a concurrent change and was abandoned.
    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that are decided locally and never reach storage or the network.
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Authorization(_) | Error::NoUnselectedCards
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Not subscribed")]
    NotSubscribed,

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<Error> for darkpot_core::Error {
    fn from(e: Error) -> Self {
        darkpot_core::Error::Transport(e.to_string())
    }
}

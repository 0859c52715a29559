//! Common error types for the VRRP manager components.

use std::fmt;

/// A specialized Result type for VRRP manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for VRRP manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed desired-state document.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure producing the daemon configuration artifact.
    #[error("Render error: {0}")]
    Render(String),

    /// Failure spawning or signalling a daemon process.
    #[error("Process error: {0}")]
    Process(String),

    /// Connection, lock, read or write failure against the coordination store.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration line rejected by the local configuration CLI.
    #[error("CLI error: {0}")]
    Cli(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new decode error.
    pub fn decode(msg: impl fmt::Display) -> Self {
        Error::Decode(msg.to_string())
    }

    /// Create a new render error.
    pub fn render(msg: impl fmt::Display) -> Self {
        Error::Render(msg.to_string())
    }

    /// Create a new process error.
    pub fn process(msg: impl fmt::Display) -> Self {
        Error::Process(msg.to_string())
    }

    /// Create a new store error.
    pub fn store(msg: impl fmt::Display) -> Self {
        Error::Store(msg.to_string())
    }

    /// Create a new CLI error.
    pub fn cli(msg: impl fmt::Display) -> Self {
        Error::Cli(msg.to_string())
    }
}

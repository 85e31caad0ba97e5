//! Error types for the tunneler core library.

use thiserror::Error;

/// Result type alias using tunneler Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tunnel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The background ssh process could not be started.
    #[error("Unable to start SSH Tunnel process: {0}")]
    Launch(String),

    /// Every verification attempt failed after launching.
    #[error("Could Not Create SSH Tunnel with command:\n\t{command}\nCheck your configuration.")]
    Unreachable { command: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shell command could not be executed at all (as opposed to exiting non-zero).
    #[error("Failed to execute `{command}`: {source}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit status the CLI reports for this error.
    ///
    /// `1` and `2` are taken by the success codes of `activate`, so failures
    /// start at `3`.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Unreachable { .. } => 3,
            Self::Launch(_) => 4,
            Self::Config(_) | Self::Json(_) => 78,
            Self::Exec { .. } | Self::Io(_) => 74,
        }
    }
}

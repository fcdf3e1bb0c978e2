//! Vote store errors

use votepipe_core::{ConfigError, ErrorMetadata, InvalidVoteError, LogLevel};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not connected to the vote store")]
    NotConnected,

    #[error("Already connected to the vote store")]
    AlreadyConnected,

    #[error(transparent)]
    InvalidVote(#[from] InvalidVoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Vote store connection failed: {source}")]
    Connection {
        /// Worth retrying (network, TLS, pool timeout, server starting up).
        transient: bool,
        #[source]
        source: anyhow::Error,
    },

    #[error("Vote store connection failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn connection(transient: bool, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Connection {
            transient,
            source: source.into(),
        }
    }

    pub fn operation(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Operation {
            operation,
            source: source.into(),
        }
    }

    /// Connection failures that a retry might fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection { transient: true, .. })
    }
}

impl ErrorMetadata for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            StoreError::NotConnected => "STORE_NOT_CONNECTED",
            StoreError::AlreadyConnected => "STORE_ALREADY_CONNECTED",
            StoreError::InvalidVote(e) => e.error_code(),
            StoreError::Config(e) => e.error_code(),
            StoreError::Connection { .. } => "STORE_CONNECTION",
            StoreError::RetriesExhausted { .. } => "STORE_RETRIES_EXHAUSTED",
            StoreError::Operation { .. } => "STORE_OPERATION",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidVote(_) | StoreError::Operation { .. }
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            StoreError::InvalidVote(e) => e.log_level(),
            StoreError::AlreadyConnected => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

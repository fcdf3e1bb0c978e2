use votepipe_core::{ConfigError, ErrorMetadata, LogLevel};
use votepipe_db::StoreError;
use votepipe_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Malformed queue message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("Queue connection closed unexpectedly")]
    QueueClosed,
}

impl WorkerError {
    /// Process exit code for a worker that stopped with this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl ErrorMetadata for WorkerError {
    fn error_code(&self) -> &'static str {
        match self {
            WorkerError::Config(e) => e.error_code(),
            WorkerError::Store(e) => e.error_code(),
            WorkerError::Queue(e) => e.error_code(),
            WorkerError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            WorkerError::QueueClosed => "QUEUE_CLOSED_UNEXPECTEDLY",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            WorkerError::Config(e) => e.is_recoverable(),
            WorkerError::Store(e) => e.is_recoverable(),
            WorkerError::Queue(e) => e.is_recoverable(),
            WorkerError::MalformedMessage(_) => true,
            WorkerError::QueueClosed => false,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            WorkerError::Config(e) => e.log_level(),
            WorkerError::Store(e) => e.log_level(),
            WorkerError::Queue(e) => e.log_level(),
            WorkerError::MalformedMessage(_) => LogLevel::Warn,
            WorkerError::QueueClosed => LogLevel::Error,
        }
    }
}

/// Log `err` at the level its metadata asks for.
pub fn log_error(err: &WorkerError, message: &str) {
    let code = err.error_code();
    let recoverable = err.is_recoverable();
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(error = %err, code, recoverable, "{}", message),
        LogLevel::Warn => tracing::warn!(error = %err, code, recoverable, "{}", message),
        LogLevel::Error => tracing::error!(error = %err, code, recoverable, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use votepipe_core::InvalidVoteError;

    #[test]
    fn per_message_errors_are_recoverable() {
        let malformed =
            WorkerError::MalformedMessage(serde_json::from_str::<u8>("nope").unwrap_err());
        assert!(malformed.is_recoverable());
        assert_eq!(malformed.log_level(), LogLevel::Warn);

        let invalid: WorkerError =
            StoreError::from(InvalidVoteError::new(vec!["missing vote".to_string()])).into();
        assert!(invalid.is_recoverable());
        assert_eq!(invalid.error_code(), "INVALID_VOTE");
    }

    #[test]
    fn connection_loss_is_fatal() {
        let err: WorkerError = QueueError::Connection("reset by peer".to_string()).into();
        assert!(!err.is_recoverable());
        assert_eq!(err.exit_code(), 1);
        assert!(!WorkerError::QueueClosed.is_recoverable());
    }
}

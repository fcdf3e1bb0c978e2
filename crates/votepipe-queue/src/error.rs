use votepipe_core::{ConfigError, ErrorMetadata, LogLevel};

/// Message returned for any operation attempted after `quit`/`disconnect`.
pub const CONNECTION_CLOSED: &str = "Connection is closed.";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Connection is closed.")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Queue command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Whether this error means the underlying connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, QueueError::Closed | QueueError::Connection(_))
    }
}

#[cfg(feature = "redis")]
impl QueueError {
    pub(crate) fn from_redis(command: &'static str, err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::Command {
                command,
                message: err.to_string(),
            }
        }
    }
}

impl ErrorMetadata for QueueError {
    fn error_code(&self) -> &'static str {
        match self {
            QueueError::Closed => "QUEUE_CLOSED",
            QueueError::Serialization(_) => "QUEUE_SERIALIZATION",
            QueueError::Connection(_) => "QUEUE_CONNECTION",
            QueueError::Command { .. } => "QUEUE_COMMAND",
            QueueError::Config(e) => e.error_code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueueError::Serialization(_) | QueueError::Command { .. }
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            QueueError::Closed => LogLevel::Debug,
            QueueError::Serialization(_) => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_message_matches_constant() {
        assert_eq!(QueueError::Closed.to_string(), CONNECTION_CLOSED);
        assert!(QueueError::Closed.is_connection_error());
        assert!(!QueueError::Closed.is_recoverable());
    }

    #[test]
    fn serialization_errors_are_recoverable() {
        let err: QueueError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_code(), "QUEUE_SERIALIZATION");
        assert!(err.is_recoverable());
        assert!(!err.is_connection_error());
    }
}

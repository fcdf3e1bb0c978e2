//! Error types module
//!
//! Errors shared by every votepipe component. Configuration and vote validation
//! errors live here because both the queue and the store raise them; the
//! connection-level errors are owned by their respective crates and describe
//! themselves through [`ErrorMetadata`].

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like a timed-out receive
    Debug,
    /// Warning level - for bad input that is dropped
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be reported and whether the pipeline can
/// keep going after it.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INVALID_VOTE")
    fn error_code(&self) -> &'static str;

    /// Whether processing can continue past this error (it is scoped to a single
    /// message or a single connection attempt).
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Malformed or incomplete connection configuration. Fatal at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    // don't forget to update tests if this message changes
    #[error(
        "Invalid config. Provide a valid uri, or else valid values for the following: {}",
        .missing.join(", ")
    )]
    Incomplete { missing: Vec<&'static str> },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// A vote payload that failed validation. Lists every problem found, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid vote: {}", .problems.join(", "))]
pub struct InvalidVoteError {
    problems: Vec<String>,
}

impl InvalidVoteError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl ErrorMetadata for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Incomplete { .. } => "CONFIG_INCOMPLETE",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn log_level(&self) -> LogLevel {
        LogLevel::Error
    }
}

impl ErrorMetadata for InvalidVoteError {
    fn error_code(&self) -> &'static str {
        "INVALID_VOTE"
    }

    fn is_recoverable(&self) -> bool {
        true
    }

    fn log_level(&self) -> LogLevel {
        LogLevel::Warn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_config_lists_every_missing_field() {
        let err = ConfigError::Incomplete {
            missing: vec!["host", "port", "db"],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid config"));
        assert!(msg.ends_with("host, port, db"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn invalid_vote_joins_problems() {
        let err = InvalidVoteError::new(vec![
            "missing vote".to_string(),
            "missing choice property".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid vote: missing vote, missing choice property"
        );
        assert_eq!(err.problems().len(), 2);
        assert_eq!(err.log_level(), LogLevel::Warn);
    }
}

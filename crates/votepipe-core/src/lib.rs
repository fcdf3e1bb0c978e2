//! votepipe core library
//!
//! This crate provides the domain models, error types, layered configuration and
//! connection primitives (backoff, lifecycle monitor) shared by the queue, store and
//! worker crates.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use backoff::{Backoff, BackoffConfig, BackoffError};
pub use config::{QueueConfig, StoreConfig, WorkerConfig};
pub use connection::{
    ClosedBeforeReady, ConnectionEvent, ConnectionMonitor, ConnectionState, ConnectionStatus,
};
pub use error::{ConfigError, ErrorMetadata, InvalidVoteError, LogLevel};
pub use models::{Choice, Tally, ValidatedVote, Vote, VoteSubmission};

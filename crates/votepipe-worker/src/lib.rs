//! votepipe worker
//!
//! Drains vote submissions from the work queue into the vote store, one message at a
//! time, with an orderly shutdown on SIGINT/SIGTERM.

pub mod error;
pub mod shutdown;
pub mod telemetry;
mod worker;

pub use error::WorkerError;
pub use shutdown::{Shutdown, ShutdownRequest, FORCED_EXIT_CODE};
pub use worker::{Worker, WorkerState, WorkerStats};

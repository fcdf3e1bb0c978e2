//! Storage seam for the work queue.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use votepipe_core::QueueConfig;

use crate::error::QueueError;

/// A list-per-topic store with atomic tail append and blocking head pop.
///
/// Implementations must be safe to share between tasks. `pop` with
/// `Duration::ZERO` waits until a message arrives; any other timeout returns
/// `Ok(None)` once it elapses. After `quit` or `disconnect` every operation
/// fails with [`QueueError::Closed`].
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, topic: &str, payload: String) -> Result<(), QueueError>;

    async fn pop(&self, topic: &str, timeout: Duration) -> Result<Option<String>, QueueError>;

    async fn ping(&self) -> Result<String, QueueError>;

    /// Graceful close: let the server acknowledge, then drop the connection.
    async fn quit(&self) -> Result<(), QueueError>;

    /// Forceful close.
    async fn disconnect(&self);

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// Opens backend connections. One attempt per call.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn open(&self, config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError>;
}

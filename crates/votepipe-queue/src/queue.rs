use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use votepipe_core::{ConnectionEvent, ConnectionMonitor, QueueConfig};

use crate::backend::{QueueBackend, QueueConnector};
use crate::error::QueueError;
use crate::message::QueueMessage;

/// A named FIFO list plus the connection it lives on.
///
/// Producers append to the tail, consumers take from the head. The connection state
/// is tracked by a [`ConnectionMonitor`]; closing the queue (from any task) promptly
/// unblocks a pending [`WorkQueue::receive`].
#[derive(Clone)]
pub struct WorkQueue {
    topic: String,
    config: QueueConfig,
    backend: Arc<dyn QueueBackend>,
    monitor: ConnectionMonitor,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("topic", &self.topic)
            .field("backend", &self.backend.name())
            .field("state", &self.monitor.state())
            .finish()
    }
}

impl WorkQueue {
    /// Connect to the Redis server described by `config`. One attempt, no retry.
    #[cfg(feature = "redis")]
    pub async fn connect(topic: impl Into<String>, config: QueueConfig) -> Result<Self, QueueError> {
        Self::open(topic, config, &crate::redis_list::RedisConnector).await
    }

    /// Open a connection through `connector`. One attempt, no retry.
    #[tracing::instrument(skip(topic, config, connector), fields(url = %config.redacted_url()))]
    pub async fn open(
        topic: impl Into<String>,
        config: QueueConfig,
        connector: &dyn QueueConnector,
    ) -> Result<Self, QueueError> {
        let monitor = ConnectionMonitor::new();
        monitor.mark_connecting();

        match connector.open(&config).await {
            Ok(backend) => {
                let queue = Self::from_parts(topic.into(), config, backend, monitor);
                tracing::info!(topic = %queue.topic, backend = queue.backend.name(), "Queue connected");
                Ok(queue)
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue connection failed");
                monitor.emit(ConnectionEvent::Error(e.to_string()));
                monitor.emit(ConnectionEvent::End);
                Err(e)
            }
        }
    }

    /// Wrap an already-open backend.
    pub fn with_backend(
        topic: impl Into<String>,
        config: QueueConfig,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        Self::from_parts(topic.into(), config, backend, ConnectionMonitor::new())
    }

    fn from_parts(
        topic: String,
        config: QueueConfig,
        backend: Arc<dyn QueueBackend>,
        monitor: ConnectionMonitor,
    ) -> Self {
        monitor.emit(ConnectionEvent::Connect);
        monitor.emit(ConnectionEvent::Ready);
        Self {
            topic,
            config,
            backend,
            monitor,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.monitor.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }

    /// Wait until the connection is usable.
    pub async fn ready(&self) -> Result<(), QueueError> {
        self.monitor.ready().await.map_err(|_| QueueError::Closed)
    }

    /// Append a message to the tail of the topic list.
    #[tracing::instrument(skip(self, message), fields(topic = %self.topic))]
    pub async fn send(&self, message: impl Into<QueueMessage>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let payload = message.into().into_payload()?;
        self.backend
            .push(&self.topic, payload)
            .await
            .map_err(|e| self.on_failure(e))
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), QueueError> {
        let payload = serde_json::to_string(value)?;
        self.send(QueueMessage::Text(payload)).await
    }

    /// Take the message at the head of the list.
    ///
    /// `None` uses the configured default timeout; `Duration::ZERO` blocks until a
    /// message arrives. Returns `Ok(None)` on timeout and when the queue is (or becomes)
    /// closed.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<String>, QueueError> {
        if self.is_closed() {
            return Ok(None);
        }
        let timeout = timeout.unwrap_or(self.config.timeout);

        tokio::select! {
            biased;
            _ = self.monitor.closed() => Ok(None),
            result = self.backend.pop(&self.topic, timeout) => match result {
                Ok(message) => Ok(message),
                // The connection went away underneath us; mark the queue closed so
                // callers can tell this apart from a timeout.
                Err(QueueError::Closed) => {
                    self.on_failure(QueueError::Closed);
                    Ok(None)
                }
                Err(e) => Err(self.on_failure(e)),
            },
        }
    }

    pub async fn ping(&self) -> Result<String, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.backend.ping().await.map_err(|e| self.on_failure(e))
    }

    /// Close gracefully. Idempotent.
    pub async fn quit(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            return Ok(());
        }
        self.monitor.emit(ConnectionEvent::Close);
        let result = self.backend.quit().await;
        self.monitor.emit(ConnectionEvent::End);
        tracing::debug!(topic = %self.topic, "Queue connection closed");
        result
    }

    /// Close immediately. Idempotent.
    pub async fn disconnect(&self) {
        if self.is_closed() {
            return;
        }
        self.monitor.emit(ConnectionEvent::Close);
        self.backend.disconnect().await;
        self.monitor.emit(ConnectionEvent::End);
        tracing::debug!(topic = %self.topic, "Queue connection dropped");
    }

    /// Connection-class failures end the connection; anything else is passed through.
    fn on_failure(&self, err: QueueError) -> QueueError {
        if err.is_connection_error() && !self.is_closed() {
            tracing::error!(topic = %self.topic, error = %err, "Queue connection lost");
            self.monitor.emit(ConnectionEvent::Error(err.to_string()));
            self.monitor.emit(ConnectionEvent::End);
        }
        err
    }
}

/// Sending side of a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct Producer {
    queue: WorkQueue,
}

impl Producer {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    #[cfg(feature = "redis")]
    pub async fn connect(topic: impl Into<String>, config: QueueConfig) -> Result<Self, QueueError> {
        WorkQueue::connect(topic, config).await.map(Self::new)
    }

    pub async fn send(&self, message: impl Into<QueueMessage>) -> Result<(), QueueError> {
        self.queue.send(message).await
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), QueueError> {
        self.queue.send_json(value).await
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub async fn ping(&self) -> Result<String, QueueError> {
        self.queue.ping().await
    }

    pub async fn quit(&self) -> Result<(), QueueError> {
        self.queue.quit().await
    }

    pub async fn disconnect(&self) {
        self.queue.disconnect().await
    }
}

/// Receiving side of a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct Consumer {
    queue: WorkQueue,
}

impl Consumer {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    #[cfg(feature = "redis")]
    pub async fn connect(topic: impl Into<String>, config: QueueConfig) -> Result<Self, QueueError> {
        WorkQueue::connect(topic, config).await.map(Self::new)
    }

    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<String>, QueueError> {
        self.queue.receive(timeout).await
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub async fn ready(&self) -> Result<(), QueueError> {
        self.queue.ready().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.queue.subscribe()
    }

    pub async fn ping(&self) -> Result<String, QueueError> {
        self.queue.ping().await
    }

    pub async fn quit(&self) -> Result<(), QueueError> {
        self.queue.quit().await
    }

    pub async fn disconnect(&self) {
        self.queue.disconnect().await
    }
}

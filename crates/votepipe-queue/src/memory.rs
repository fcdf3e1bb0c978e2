//! In-process queue backend.
//!
//! An [`InMemoryBroker`] plays the role of the server: it owns one list per topic and
//! is shared by every handle created from it. Each [`InMemoryBackend`] is one client
//! connection and can be closed independently of the broker and of other handles.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use votepipe_core::QueueConfig;

use crate::backend::{QueueBackend, QueueConnector};
use crate::error::QueueError;

#[derive(Default)]
struct BrokerInner {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

/// Shared topic lists. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("topics", &self.lists().len())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client handle on this broker.
    pub fn backend(&self) -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend {
            broker: self.clone(),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        })
    }

    /// Number of messages waiting on `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.lists().get(topic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        // A panic while holding the lock cannot leave a list half-modified.
        self.inner
            .lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, topic: &str, payload: String) {
        self.lists()
            .entry(topic.to_string())
            .or_default()
            .push_back(payload);
        self.inner.pushed.notify_waiters();
    }

    fn try_pop(&self, topic: &str) -> Option<String> {
        self.lists().get_mut(topic).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl QueueConnector for InMemoryBroker {
    async fn open(&self, _config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
        Ok(self.backend())
    }
}

/// One client connection to an [`InMemoryBroker`].
pub struct InMemoryBackend {
    broker: InMemoryBroker,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl InMemoryBackend {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.closed_notify.notify_waiters();
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn push(&self, topic: &str, payload: String) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.push(topic, payload);
        Ok(())
    }

    async fn pop(&self, topic: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            // Register for wakeups before checking, so a push between the check and
            // the await is not missed.
            let pushed = self.broker.inner.pushed.notified();
            let closed = self.closed_notify.notified();
            tokio::pin!(pushed, closed);
            pushed.as_mut().enable();
            closed.as_mut().enable();

            self.ensure_open()?;
            if let Some(message) = self.broker.try_pop(topic) {
                return Ok(Some(message));
            }

            let wake = async {
                tokio::select! {
                    _ = &mut pushed => {}
                    _ = &mut closed => {}
                }
            };

            match deadline {
                None => wake.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, wake).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ping(&self) -> Result<String, QueueError> {
        self.ensure_open()?;
        Ok("PONG".to_string())
    }

    async fn quit(&self) -> Result<(), QueueError> {
        self.close();
        Ok(())
    }

    async fn disconnect(&self) {
        self.close();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_share_lists_but_close_independently() {
        let broker = InMemoryBroker::new();
        let a = broker.backend();
        let b = broker.backend();

        a.push("t", "1".to_string()).await.unwrap();
        assert_eq!(broker.len("t"), 1);

        a.quit().await.unwrap();
        assert!(matches!(a.push("t", "2".to_string()).await, Err(QueueError::Closed)));

        assert_eq!(b.pop("t", Duration::from_millis(10)).await.unwrap().as_deref(), Some("1"));
        assert!(broker.is_empty("t"));
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let broker = InMemoryBroker::new();
        let consumer = broker.backend();
        let producer = broker.backend();

        let waiter = tokio::spawn(async move { consumer.pop("t", Duration::ZERO).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.push("t", "hello".to_string()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn blocked_pop_fails_when_handle_closes() {
        let broker = InMemoryBroker::new();
        let consumer = broker.backend();
        let closer = consumer.clone();

        let waiter = tokio::spawn(async move { consumer.pop("t", Duration::ZERO).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.disconnect().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(QueueError::Closed)));
    }
}

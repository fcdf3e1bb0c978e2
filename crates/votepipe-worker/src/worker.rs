//! The queue-to-store worker.
//!
//! Lifecycle: `Initializing` (connect store with backoff, open the consumer, wait for
//! it to be ready) -> `Running` (one receive, one write at a time) -> `Draining`
//! (close the consumer, let the in-flight write finish, bounded by the grace period)
//! -> `Stopped` (store closed).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use votepipe_core::{Vote, VoteSubmission, WorkerConfig};
use votepipe_db::VoteStore;
use votepipe_queue::{Consumer, QueueConnector, WorkQueue};

use crate::error::{log_error, WorkerError};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Message counters, readable while the worker runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    rejected: AtomicU64,
}

pub struct Worker {
    config: WorkerConfig,
    store: Arc<VoteStore>,
    queue_connector: Arc<dyn QueueConnector>,
    shutdown: Shutdown,
    state: watch::Sender<WorkerState>,
    counters: Counters,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("topic", &self.config.topic)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: VoteStore,
        queue_connector: Arc<dyn QueueConnector>,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Initializing);
        Self {
            config,
            store: Arc::new(store),
            queue_connector,
            shutdown,
            state,
            counters: Counters::default(),
        }
    }

    /// Postgres store and Redis queue, as described by `config`.
    #[cfg(feature = "redis")]
    pub fn from_config(config: WorkerConfig, shutdown: Shutdown) -> Result<Self, WorkerError> {
        let store = VoteStore::new(config.store.clone())?;
        Ok(Self::new(
            config,
            store,
            Arc::new(votepipe_queue::RedisConnector),
            shutdown,
        ))
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<VoteStore> {
        &self.store
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
        tracing::debug!(%state, "Worker state changed");
    }

    /// Run until shutdown is requested or the queue fails. Always ends `Stopped`.
    pub async fn run(&self) -> Result<(), WorkerError> {
        self.set_state(WorkerState::Initializing);
        tracing::info!(topic = %self.config.topic, store = %self.store.connection_url(), "Worker starting");

        let consumer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::info!("Shutdown requested during initialization");
                self.stop().await;
                return Ok(());
            }
            result = self.initialize() => match result {
                Ok(consumer) => consumer,
                Err(e) => {
                    log_error(&e, "Worker initialization failed");
                    self.stop().await;
                    return Err(e);
                }
            },
        };

        self.set_state(WorkerState::Running);
        tracing::info!(topic = %self.config.topic, "Worker ready, waiting for votes");

        // Boxed so it can be dropped before the store closes: an abandoned write still
        // holds a store connection, and closing the store waits for it.
        let mut processing = Box::pin(self.process(&consumer));

        let finished = tokio::select! {
            result = &mut processing => Some(result),
            _ = self.shutdown.cancelled() => None,
        };

        self.set_state(WorkerState::Draining);
        if let Err(e) = consumer.quit().await {
            tracing::debug!(error = %e, "Consumer quit failed");
        }

        let result = match finished {
            Some(result) => result,
            None => match tokio::time::timeout(self.config.shutdown_grace, &mut processing).await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        grace_ms = self.config.shutdown_grace.as_millis() as u64,
                        "In-flight write did not finish within the grace period, abandoning it"
                    );
                    Ok(())
                }
            },
        };
        drop(processing);

        if let Err(e) = &result {
            log_error(e, "Worker stopped with error");
        }
        self.stop().await;
        result
    }

    async fn initialize(&self) -> Result<Consumer, WorkerError> {
        self.store.connect(self.config.backoff).await?;

        let queue = WorkQueue::open(
            self.config.topic.clone(),
            self.config.queue.clone(),
            self.queue_connector.as_ref(),
        )
        .await?;
        let consumer = Consumer::new(queue);
        consumer.ready().await?;
        Ok(consumer)
    }

    async fn stop(&self) {
        self.store.close().await;
        self.set_state(WorkerState::Stopped);
        let stats = self.stats();
        tracing::info!(
            processed = stats.processed,
            rejected = stats.rejected,
            "Worker stopped"
        );
    }

    /// The processing loop. Returns `Ok` once the consumer is closed for shutdown.
    async fn process(&self, consumer: &Consumer) -> Result<(), WorkerError> {
        loop {
            match consumer.receive(Some(Duration::ZERO)).await? {
                Some(payload) => self.handle(&payload).await,
                None if self.shutdown.is_quitting() => return Ok(()),
                None if consumer.is_closed() => {
                    tracing::error!("Queue closed while the worker was running");
                    self.shutdown.request();
                    return Err(WorkerError::QueueClosed);
                }
                None => continue,
            }
        }
    }

    async fn handle(&self, payload: &str) {
        match self.record(payload).await {
            Ok(vote) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(voter_id = %vote.voter_id, choice = %vote.choice, "Vote processed");
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                log_error(&e, "Dropping queue message");
            }
        }
    }

    async fn record(&self, payload: &str) -> Result<Vote, WorkerError> {
        // `null` parses to `None` and is rejected by the store as a missing vote.
        let submission: Option<VoteSubmission> =
            serde_json::from_str(payload).map_err(WorkerError::MalformedMessage)?;
        Ok(self.store.update_vote(submission.as_ref()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use votepipe_core::{BackoffConfig, StoreConfig};
    use votepipe_db::{InMemoryConnector, StoreError};
    use votepipe_queue::InMemoryBroker;

    async fn connected_worker() -> Worker {
        let store = VoteStore::with_connector(
            StoreConfig::standard(),
            Arc::new(InMemoryConnector::new()),
        )
        .unwrap();
        store
            .connect(BackoffConfig::new(Duration::from_millis(1), 0))
            .await
            .unwrap();
        Worker::new(
            WorkerConfig::default(),
            store,
            Arc::new(InMemoryBroker::new()),
            Shutdown::new(),
        )
    }

    #[tokio::test]
    async fn null_payload_is_a_missing_vote() {
        let worker = connected_worker().await;

        match worker.record("null").await.unwrap_err() {
            WorkerError::Store(StoreError::InvalidVote(e)) => {
                assert_eq!(e.problems(), ["missing vote"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_payload_is_malformed() {
        let worker = connected_worker().await;

        assert!(matches!(
            worker.record("{not json").await,
            Err(WorkerError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn handled_messages_are_counted() {
        let worker = connected_worker().await;

        worker.handle(r#"{"choice":"a","voter_id":"v1"}"#).await;
        worker.handle("null").await;

        assert_eq!(worker.stats(), WorkerStats { processed: 1, rejected: 1 });
    }
}

//! The vote store: connection lifecycle plus the two data operations.

use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use votepipe_core::{
    Backoff, BackoffConfig, BackoffError, ConnectionEvent, ConnectionMonitor, ConnectionState,
    StoreConfig, Tally, Vote, VoteSubmission,
};

use crate::error::StoreError;
use crate::repository::{PostgresConnector, StoreConnector, VoteRepository};

/// Persistent vote storage with idempotent upsert and tally aggregation.
///
/// The configuration is validated when the store is built; the connection is opened
/// by [`VoteStore::connect`], which retries transient failures with exponential
/// backoff.
pub struct VoteStore {
    config: StoreConfig,
    connector: Arc<dyn StoreConnector>,
    repository: RwLock<Option<Arc<dyn VoteRepository>>>,
    connecting: Mutex<()>,
    monitor: ConnectionMonitor,
}

impl std::fmt::Debug for VoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteStore")
            .field("connector", &self.connector.name())
            .field("state", &self.monitor.state())
            .finish()
    }
}

impl VoteStore {
    /// Postgres-backed store.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        Self::with_connector(config, Arc::new(PostgresConnector))
    }

    pub fn with_connector(
        config: StoreConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            repository: RwLock::new(None),
            connecting: Mutex::new(()),
            monitor: ConnectionMonitor::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connection URL with the password redacted.
    pub fn connection_url(&self) -> String {
        // Validated at construction, so this cannot fail.
        self.config.redacted_url().unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.monitor.subscribe()
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Open the connection, retrying transient failures.
    ///
    /// Emits `Reconnecting` before each retry, then `Connect` and `Ready` on success or
    /// `Error` and `End` when giving up.
    #[tracing::instrument(skip(self, backoff), fields(url = %self.connection_url(), connector = self.connector.name()))]
    pub async fn connect(&self, backoff: BackoffConfig) -> Result<(), StoreError> {
        let _guard = self.connecting.lock().await;
        if self.repository.read().await.is_some() {
            return Err(StoreError::AlreadyConnected);
        }

        self.monitor.mark_connecting();
        tracing::info!("Connecting to vote store");

        let monitor = self.monitor.clone();
        let backoff = Backoff::new(backoff)
            .retry_if(StoreError::is_transient)
            .on_retry(move |attempt, delay, err: &StoreError| {
                monitor.emit(ConnectionEvent::Error(err.to_string()));
                monitor.emit(ConnectionEvent::Reconnecting { attempt, delay });
            });

        match backoff.run(|| self.connector.connect(&self.config)).await {
            Ok(repository) => {
                *self.repository.write().await = Some(repository);
                self.monitor.emit(ConnectionEvent::Connect);
                self.monitor.emit(ConnectionEvent::Ready);
                tracing::info!("Vote store connected");
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    BackoffError::Exhausted { attempts, source } => StoreError::RetriesExhausted {
                        attempts,
                        source: Box::new(source),
                    },
                    BackoffError::Rejected(source) => source,
                    BackoffError::InvalidAttempt(e) => StoreError::connection(false, e),
                };
                tracing::error!(error = %err, "Vote store connection failed");
                self.monitor.emit(ConnectionEvent::Error(err.to_string()));
                self.monitor.emit(ConnectionEvent::End);
                Err(err)
            }
        }
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) {
        let repository = self.repository.write().await.take();
        if let Some(repository) = repository {
            repository.close().await;
            self.monitor.emit(ConnectionEvent::Close);
            self.monitor.emit(ConnectionEvent::End);
            tracing::info!("Vote store closed");
        }
    }

    async fn repository(&self) -> Result<Arc<dyn VoteRepository>, StoreError> {
        self.repository
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotConnected)
    }

    /// Validate `submission` and record it, replacing any earlier vote by the same voter.
    ///
    /// A voter id is generated when the submission has none. A missing submission
    /// (`None`, e.g. a JSON `null` payload) is rejected as `missing vote`.
    #[tracing::instrument(skip(self, submission), fields(db.table = "votes", db.operation = "upsert"))]
    pub async fn update_vote<'a>(
        &self,
        submission: impl Into<Option<&'a VoteSubmission>>,
    ) -> Result<Vote, StoreError> {
        let submission = submission.into();
        let repository = self.repository().await?;
        let vote = VoteSubmission::validate(submission)?;

        let voter_id = vote
            .voter_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let stored = repository
            .upsert_vote(&voter_id, vote.choice)
            .await
            .map_err(|e| StoreError::operation("update_vote", e))?;

        tracing::debug!(voter_id = %stored.voter_id, choice = %stored.choice, "Vote recorded");
        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(db.table = "votes", db.operation = "select"))]
    pub async fn tally_votes(&self) -> Result<Tally, StoreError> {
        let repository = self.repository().await?;
        repository
            .tally()
            .await
            .map_err(|e| StoreError::operation("tally_votes", e))
    }
}

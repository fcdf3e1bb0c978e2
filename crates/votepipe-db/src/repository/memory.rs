use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use votepipe_core::{Choice, StoreConfig, Tally, Vote};

use super::{StoreConnector, VoteRepository};
use crate::error::StoreError;

type VoteTable = Arc<RwLock<HashMap<String, Vote>>>;

/// Writes currently running, shared by every handle on a table.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct WriteGuard<'a>(&'a InFlight);

impl<'a> WriteGuard<'a> {
    fn enter(in_flight: &'a InFlight) -> Self {
        in_flight.count.fetch_add(1, Ordering::AcqRel);
        Self(in_flight)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Votes kept in process memory. Handles opened from the same table share data.
///
/// Like a connection pool, `close` waits until every write in progress has either
/// finished or been dropped.
pub struct InMemoryVoteRepository {
    votes: VoteTable,
    in_flight: Arc<InFlight>,
    write_latency: Duration,
    closed: AtomicBool,
}

impl InMemoryVoteRepository {
    pub fn new() -> Self {
        Self::with_table(VoteTable::default(), Arc::default(), Duration::ZERO)
    }

    fn with_table(votes: VoteTable, in_flight: Arc<InFlight>, write_latency: Duration) -> Self {
        Self {
            votes,
            in_flight,
            write_latency,
            closed: AtomicBool::new(false),
        }
    }

    /// Writes that have started and not yet finished.
    pub fn writes_in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    pub async fn get(&self, voter_id: &str) -> Option<Vote> {
        self.votes.read().await.get(voter_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.votes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("in-memory vote repository is closed");
        }
        Ok(())
    }
}

impl Default for InMemoryVoteRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoteRepository for InMemoryVoteRepository {
    async fn upsert_vote(&self, voter_id: &str, choice: Choice) -> anyhow::Result<Vote> {
        self.ensure_open()?;
        let _guard = WriteGuard::enter(&self.in_flight);
        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }
        let vote = Vote {
            voter_id: voter_id.to_string(),
            choice,
            updated_at: Utc::now(),
        };
        self.votes
            .write()
            .await
            .insert(vote.voter_id.clone(), vote.clone());
        Ok(vote)
    }

    async fn tally(&self) -> anyhow::Result<Tally> {
        self.ensure_open()?;
        Ok(self.votes.read().await.values().map(|v| v.choice).collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.writes_in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Hands out handles on one shared in-memory table.
///
/// Can be told to fail the next few connection attempts, either transiently (so the
/// store retries) or permanently.
#[derive(Default)]
pub struct InMemoryConnector {
    votes: VoteTable,
    in_flight: Arc<InFlight>,
    write_latency: Duration,
    transient_failures: AtomicU32,
    permanent_failure: AtomicBool,
    attempts: AtomicU32,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` attempts with a transient error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every attempt with a non-transient error.
    pub fn with_permanent_failure(self) -> Self {
        self.permanent_failure.store(true, Ordering::SeqCst);
        self
    }

    /// Make every write take `latency` before it lands.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// A handle on the shared table, for inspecting what the store wrote.
    pub fn repository(&self) -> InMemoryVoteRepository {
        InMemoryVoteRepository::with_table(
            self.votes.clone(),
            self.in_flight.clone(),
            self.write_latency,
        )
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self, _config: &StoreConfig) -> Result<Arc<dyn VoteRepository>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.permanent_failure.load(Ordering::SeqCst) {
            return Err(StoreError::connection(
                false,
                anyhow::anyhow!("authentication failed"),
            ));
        }

        let pending = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::connection(
                true,
                anyhow::anyhow!("connection refused"),
            ));
        }

        Ok(Arc::new(self.repository()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

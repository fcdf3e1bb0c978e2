//! Storage seams for the vote store.
//!
//! A [`StoreConnector`] opens a connection and hands back a [`VoteRepository`] that
//! runs the two data operations against it. Postgres is the production pair; the
//! in-memory pair backs tests and local runs.

use async_trait::async_trait;
use std::sync::Arc;

use votepipe_core::{Choice, StoreConfig, Tally, Vote};

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryConnector, InMemoryVoteRepository};
pub use postgres::{PostgresConnector, PostgresVoteRepository};

#[async_trait]
pub trait VoteRepository: Send + Sync {
    /// Insert or replace the vote for `voter_id`. Atomic per voter.
    async fn upsert_vote(&self, voter_id: &str, choice: Choice) -> anyhow::Result<Vote>;

    async fn tally(&self) -> anyhow::Result<Tally>;

    async fn close(&self);
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// One connection attempt. Failures are reported as [`StoreError::Connection`]
    /// with the transient flag set when a retry might succeed.
    async fn connect(&self, config: &StoreConfig) -> Result<Arc<dyn VoteRepository>, StoreError>;

    fn name(&self) -> &'static str;
}

//! votepipe vote store
//!
//! [`VoteStore`] owns the connection lifecycle (validated config, connect with
//! backoff, idempotent close) and exposes the two data operations: upsert a vote
//! (last write wins per voter) and tally votes per choice. Storage sits behind
//! [`VoteRepository`]; Postgres via sqlx in production, memory for tests.

pub mod error;
pub mod repository;
mod store;

pub use error::StoreError;
pub use repository::{
    InMemoryConnector, InMemoryVoteRepository, PostgresConnector, PostgresVoteRepository,
    StoreConnector, VoteRepository,
};
pub use store::VoteStore;

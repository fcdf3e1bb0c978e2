//! Data models for the vote pipeline
//!
//! `vote` holds the durable record and the queue payload it is built from; `tally`
//! holds the aggregate computed on read.

mod tally;
mod vote;

pub use tally::Tally;
pub use vote::{Choice, ValidatedVote, Vote, VoteSubmission};

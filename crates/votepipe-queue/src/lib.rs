//! votepipe work queue
//!
//! A durable FIFO list per topic with atomic append ([`Producer`]) and blocking
//! take-from-head ([`Consumer`]). Storage sits behind [`QueueBackend`]: Redis lists in
//! production (feature `redis`, on by default) and [`InMemoryBroker`] for tests and
//! local runs.

pub mod backend;
pub mod error;
pub mod memory;
pub mod message;
mod queue;
#[cfg(feature = "redis")]
pub mod redis_list;

pub use backend::{QueueBackend, QueueConnector};
pub use error::{QueueError, CONNECTION_CLOSED};
pub use memory::{InMemoryBackend, InMemoryBroker};
pub use message::QueueMessage;
pub use queue::{Consumer, Producer, WorkQueue};
#[cfg(feature = "redis")]
pub use redis_list::{RedisConnector, RedisListBackend};

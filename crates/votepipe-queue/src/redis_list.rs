//! Redis list backend (RPUSH / BLPOP).

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use votepipe_core::QueueConfig;

use crate::backend::{QueueBackend, QueueConnector};
use crate::error::QueueError;

/// How long to wait for the server to acknowledge QUIT before dropping anyway.
const QUIT_TIMEOUT: Duration = Duration::from_millis(500);

/// BLPOP timeout argument; 0 blocks indefinitely. Whole seconds go out as an integer,
/// since servers before 6.0 reject fractional timeouts.
fn blpop_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        timeout.as_secs().to_string()
    } else {
        timeout.as_secs_f64().to_string()
    }
}

pub struct RedisListBackend {
    url: String,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisListBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisListBackend")
            .field("url", &votepipe_core::config::redact_password(&self.url))
            .finish()
    }
}

impl RedisListBackend {
    /// Open a connection to `url`. Single attempt; callers decide whether to retry.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Clone the connection out so a blocking command does not hold the lock.
    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.conn.lock().await.clone().ok_or(QueueError::Closed)
    }
}

#[async_trait]
impl QueueBackend for RedisListBackend {
    async fn push(&self, topic: &str, payload: String) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::from_redis("RPUSH", e))?;
        Ok(())
    }

    async fn pop(&self, topic: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(topic)
            .arg(blpop_timeout(timeout))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::from_redis("BLPOP", e))?;
        Ok(reply.map(|(_, message)| message))
    }

    async fn ping(&self) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::from_redis("PING", e))
    }

    async fn quit(&self) -> Result<(), QueueError> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        let quit = async {
            let reply: redis::RedisResult<()> = redis::cmd("QUIT").query_async(&mut conn).await;
            reply
        };
        match tokio::time::timeout(QUIT_TIMEOUT, quit).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "QUIT failed, dropping connection"),
            Err(_) => tracing::debug!("QUIT not acknowledged in time, dropping connection"),
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.conn.lock().await.take();
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Opens [`RedisListBackend`] connections from a [`QueueConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn open(&self, config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
        let backend = RedisListBackend::connect(&config.url()).await?;
        Ok(Arc::new(backend))
    }
}

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use std::time::Duration;

use votepipe_core::{Choice, StoreConfig, Tally, Vote};

use super::{StoreConnector, VoteRepository};
use crate::error::StoreError;

/// Postgres "cannot connect now": the server is still starting up.
const CANNOT_CONNECT_NOW: &str = "57P03";

const CREATE_VOTES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS votes (
        voter_id   TEXT PRIMARY KEY,
        choice     TEXT NOT NULL CHECK (choice IN ('a', 'b')),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// Errors that a later connection attempt might not hit.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().as_deref() == Some(CANNOT_CONNECT_NOW),
        _ => false,
    }
}

/// Votes kept in a single `votes` table keyed by `voter_id`.
#[derive(Clone)]
pub struct PostgresVoteRepository {
    pool: PgPool,
}

impl PostgresVoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `votes` table if it does not exist. Not a migration.
    #[tracing::instrument(skip(self), fields(db.table = "votes", db.operation = "create"))]
    pub async fn bootstrap(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_VOTES_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl VoteRepository for PostgresVoteRepository {
    #[tracing::instrument(skip(self), fields(db.system = "postgresql", db.table = "votes", db.operation = "upsert"))]
    async fn upsert_vote(&self, voter_id: &str, choice: Choice) -> anyhow::Result<Vote> {
        let vote = sqlx::query_as::<Postgres, Vote>(
            r#"
            INSERT INTO votes (voter_id, choice, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (voter_id)
            DO UPDATE SET choice = EXCLUDED.choice, updated_at = now()
            RETURNING voter_id, choice, updated_at
            "#,
        )
        .bind(voter_id)
        .bind(choice)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, voter_id = %voter_id, "Failed to upsert vote"))?;

        Ok(vote)
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql", db.table = "votes", db.operation = "select"))]
    async fn tally(&self) -> anyhow::Result<Tally> {
        let tally = sqlx::query_as::<Postgres, Tally>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE choice = 'a') AS count_a,
                COUNT(*) FILTER (WHERE choice = 'b') AS count_b
            FROM votes
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(tally)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens a pooled Postgres connection and makes sure the `votes` table exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl StoreConnector for PostgresConnector {
    async fn connect(&self, config: &StoreConfig) -> Result<Arc<dyn VoteRepository>, StoreError> {
        let url = config.connection_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&url)
            .await
            .map_err(|e| StoreError::connection(is_transient(&e), e))?;

        let repository = PostgresVoteRepository::new(pool);
        if let Err(e) = repository.bootstrap().await {
            let transient = is_transient(&e);
            repository.close().await;
            return Err(StoreError::connection(transient, e));
        }

        tracing::info!(
            max_connections = config.max_connections,
            "Vote store database connected"
        );
        Ok(Arc::new(repository))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

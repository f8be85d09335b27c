use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{LifecycleStatus, Record};

pub mod assets;
pub mod batches;
pub mod memory;
pub mod operations;

pub use assets::PgAssetRepository;
pub use batches::PgBatchRepository;
pub use memory::MemoryRepository;
pub use operations::PgOperationRepository;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persistence for one record type. Every call is its own transaction.
#[async_trait]
pub trait Repository<R: Record>: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<R>, RepositoryError>;

    /// Records currently in `status`, oldest update first.
    async fn find_by_status(&self, status: LifecycleStatus) -> Result<Vec<R>, RepositoryError>;

    /// Insert or replace the record.
    async fn save(&self, record: &R) -> Result<(), RepositoryError>;

    /// Read-modify-write under a row lock.
    ///
    /// `apply` returns whether it changed the record; unchanged records are
    /// not written back. Returns `None` when no record has this id.
    async fn update_with(
        &self,
        id: Uuid,
        apply: &(dyn Fn(&mut R) -> bool + Send + Sync),
    ) -> Result<Option<R>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Decode(String),
}

pub(crate) fn parse_status(value: &str) -> Result<LifecycleStatus, RepositoryError> {
    LifecycleStatus::from_str(value)
        .map_err(|_| RepositoryError::Decode(format!("unknown lifecycle status '{value}'")))
}

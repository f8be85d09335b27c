use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::{parse_status, Repository, RepositoryError};
use crate::models::{BatchJob, LifecycleStatus, OperationKind, OperationSpec};

const SELECT_BATCH: &str = r#"
    SELECT id, asset_id, operations, processing_steps, status, retry_count,
           artifact_url, error, created_at, updated_at
    FROM batch_jobs
"#;

/// PostgreSQL store for [`BatchJob`] rows.
#[derive(Clone)]
pub struct PgBatchRepository {
    pool: PgPool,
}

impl PgBatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn batch_from_row(row: &PgRow) -> Result<BatchJob, RepositoryError> {
    let status: String = row.try_get("status")?;
    let Json(operations): Json<Vec<OperationSpec>> = row.try_get("operations")?;
    let Json(processing_steps): Json<Vec<OperationKind>> = row.try_get("processing_steps")?;

    Ok(BatchJob {
        id: row.try_get("id")?,
        asset_id: row.try_get("asset_id")?,
        operations,
        processing_steps,
        status: parse_status(&status)?,
        retry_count: row.try_get("retry_count")?,
        artifact_url: row.try_get("artifact_url")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_batch<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    for_update: bool,
) -> Result<Option<BatchJob>, RepositoryError> {
    let lock = if for_update { "FOR UPDATE" } else { "" };
    let sql = format!("{SELECT_BATCH} WHERE id = $1 {lock}");
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(batch_from_row).transpose()
}

/// The operation list is written on insert only; it never changes afterwards.
async fn upsert_batch<'e, E: PgExecutor<'e>>(
    executor: E,
    batch: &BatchJob,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO batch_jobs (id, asset_id, operations, processing_steps, status,
                                retry_count, artifact_url, error, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            retry_count = EXCLUDED.retry_count,
            artifact_url = EXCLUDED.artifact_url,
            error = EXCLUDED.error,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(batch.id)
    .bind(batch.asset_id)
    .bind(Json(batch.operations.clone()))
    .bind(Json(batch.processing_steps.clone()))
    .bind(batch.status.to_string())
    .bind(batch.retry_count)
    .bind(&batch.artifact_url)
    .bind(&batch.error)
    .bind(batch.created_at)
    .bind(batch.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository<BatchJob> for PgBatchRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<BatchJob>, RepositoryError> {
        fetch_batch(&self.pool, id, false).await
    }

    async fn find_by_status(&self, status: LifecycleStatus) -> Result<Vec<BatchJob>, RepositoryError> {
        let sql = format!("{SELECT_BATCH} WHERE status = $1 ORDER BY updated_at ASC");
        let rows = sqlx::query(&sql)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn save(&self, batch: &BatchJob) -> Result<(), RepositoryError> {
        upsert_batch(&self.pool, batch).await
    }

    async fn update_with(
        &self,
        id: Uuid,
        apply: &(dyn Fn(&mut BatchJob) -> bool + Send + Sync),
    ) -> Result<Option<BatchJob>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut batch) = fetch_batch(&mut *tx, id, true).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if apply(&mut batch) {
            upsert_batch(&mut *tx, &batch).await?;
        }
        tx.commit().await?;
        Ok(Some(batch))
    }
}

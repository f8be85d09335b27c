use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{parse_status, Repository, RepositoryError};
use crate::models::{LifecycleStatus, OperationKind, OperationRecord, OperationSpec};

const SELECT_OPERATION: &str = r#"
    SELECT id, asset_id, batch_id, kind, params, input_path, output_path, error,
           status, retry_count, created_at, updated_at
    FROM operation_records
"#;

/// PostgreSQL store for per-stage [`OperationRecord`] rows.
#[derive(Clone)]
pub struct PgOperationRepository {
    pool: PgPool,
}

impl PgOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn operation_from_row(row: &PgRow) -> Result<OperationRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    let kind: String = row.try_get("kind")?;
    let Json(params): Json<OperationSpec> = row.try_get("params")?;

    Ok(OperationRecord {
        id: row.try_get("id")?,
        asset_id: row.try_get("asset_id")?,
        batch_id: row.try_get("batch_id")?,
        kind: OperationKind::from_str(&kind)
            .map_err(|_| RepositoryError::Decode(format!("unknown operation kind '{kind}'")))?,
        params,
        input_path: row.try_get("input_path")?,
        output_path: row.try_get("output_path")?,
        error: row.try_get("error")?,
        status: parse_status(&status)?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_operation<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    for_update: bool,
) -> Result<Option<OperationRecord>, RepositoryError> {
    let lock = if for_update { "FOR UPDATE" } else { "" };
    let sql = format!("{SELECT_OPERATION} WHERE id = $1 {lock}");
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(operation_from_row).transpose()
}

async fn upsert_operation<'e, E: PgExecutor<'e>>(
    executor: E,
    record: &OperationRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO operation_records (id, asset_id, batch_id, kind, params, input_path,
                                       output_path, error, status, retry_count,
                                       created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET output_path = EXCLUDED.output_path,
            error = EXCLUDED.error,
            status = EXCLUDED.status,
            retry_count = EXCLUDED.retry_count,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(record.id)
    .bind(record.asset_id)
    .bind(record.batch_id)
    .bind(record.kind.to_string())
    .bind(Json(record.params.clone()))
    .bind(&record.input_path)
    .bind(&record.output_path)
    .bind(&record.error)
    .bind(record.status.to_string())
    .bind(record.retry_count)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository<OperationRecord> for PgOperationRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OperationRecord>, RepositoryError> {
        fetch_operation(&self.pool, id, false).await
    }

    async fn find_by_status(
        &self,
        status: LifecycleStatus,
    ) -> Result<Vec<OperationRecord>, RepositoryError> {
        let sql = format!("{SELECT_OPERATION} WHERE status = $1 ORDER BY updated_at ASC");
        let rows = sqlx::query(&sql)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(operation_from_row).collect()
    }

    async fn save(&self, record: &OperationRecord) -> Result<(), RepositoryError> {
        upsert_operation(&self.pool, record).await
    }

    async fn update_with(
        &self,
        id: Uuid,
        apply: &(dyn Fn(&mut OperationRecord) -> bool + Send + Sync),
    ) -> Result<Option<OperationRecord>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = fetch_operation(&mut *tx, id, true).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if apply(&mut record) {
            upsert_operation(&mut *tx, &record).await?;
        }
        tx.commit().await?;
        Ok(Some(record))
    }
}

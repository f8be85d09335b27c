use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::{parse_status, Repository, RepositoryError};
use crate::models::{LifecycleStatus, MediaAsset};

const SELECT_ASSET: &str = r#"
    SELECT id, filename, local_path, storage_url, format, duration_secs, size_bytes,
           status, retry_count, created_at, updated_at
    FROM media_assets
"#;

/// PostgreSQL store for [`MediaAsset`] rows.
#[derive(Clone)]
pub struct PgAssetRepository {
    pool: PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn asset_from_row(row: &PgRow) -> Result<MediaAsset, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(MediaAsset {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        local_path: row.try_get("local_path")?,
        storage_url: row.try_get("storage_url")?,
        format: row.try_get("format")?,
        duration_secs: row.try_get("duration_secs")?,
        size_bytes: row.try_get("size_bytes")?,
        status: parse_status(&status)?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_asset<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    for_update: bool,
) -> Result<Option<MediaAsset>, RepositoryError> {
    let lock = if for_update { "FOR UPDATE" } else { "" };
    let sql = format!("{SELECT_ASSET} WHERE id = $1 {lock}");
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(asset_from_row).transpose()
}

async fn upsert_asset<'e, E: PgExecutor<'e>>(
    executor: E,
    asset: &MediaAsset,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO media_assets (id, filename, local_path, storage_url, format, duration_secs,
                                  size_bytes, status, retry_count, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE
        SET local_path = EXCLUDED.local_path,
            storage_url = COALESCE(media_assets.storage_url, EXCLUDED.storage_url),
            duration_secs = EXCLUDED.duration_secs,
            status = EXCLUDED.status,
            retry_count = EXCLUDED.retry_count,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(asset.id)
    .bind(&asset.filename)
    .bind(&asset.local_path)
    .bind(&asset.storage_url)
    .bind(&asset.format)
    .bind(asset.duration_secs)
    .bind(asset.size_bytes)
    .bind(asset.status.to_string())
    .bind(asset.retry_count)
    .bind(asset.created_at)
    .bind(asset.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository<MediaAsset> for PgAssetRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaAsset>, RepositoryError> {
        fetch_asset(&self.pool, id, false).await
    }

    async fn find_by_status(
        &self,
        status: LifecycleStatus,
    ) -> Result<Vec<MediaAsset>, RepositoryError> {
        let sql = format!("{SELECT_ASSET} WHERE status = $1 ORDER BY updated_at ASC");
        let rows = sqlx::query(&sql)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn save(&self, asset: &MediaAsset) -> Result<(), RepositoryError> {
        upsert_asset(&self.pool, asset).await
    }

    async fn update_with(
        &self,
        id: Uuid,
        apply: &(dyn Fn(&mut MediaAsset) -> bool + Send + Sync),
    ) -> Result<Option<MediaAsset>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut asset) = fetch_asset(&mut *tx, id, true).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if apply(&mut asset) {
            upsert_asset(&mut *tx, &asset).await?;
        }
        tx.commit().await?;
        Ok(Some(asset))
    }
}

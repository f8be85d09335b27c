use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Repository, RepositoryError};
use crate::models::{LifecycleStatus, Record};

/// Process-local repository used in standalone mode and in tests.
///
/// The write lock plays the role of the row lock: `update_with` calls on
/// the same store are serialized.
pub struct MemoryRepository<R> {
    records: RwLock<HashMap<Uuid, R>>,
}

impl<R: Record> MemoryRepository<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every stored record, oldest update first.
    pub async fn all(&self) -> Vec<R> {
        let mut records: Vec<R> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.updated_at());
        records
    }
}

impl<R: Record> Default for MemoryRepository<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> Repository<R> for MemoryRepository<R> {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<R>, RepositoryError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: LifecycleStatus) -> Result<Vec<R>, RepositoryError> {
        Ok(self
            .all()
            .await
            .into_iter()
            .filter(|r| r.status() == status)
            .collect())
    }

    async fn save(&self, record: &R) -> Result<(), RepositoryError> {
        self.records.write().await.insert(record.id(), record.clone());
        Ok(())
    }

    async fn update_with(
        &self,
        id: Uuid,
        apply: &(dyn Fn(&mut R) -> bool + Send + Sync),
    ) -> Result<Option<R>, RepositoryError> {
        let mut records = self.records.write().await;
        let Some(stored) = records.get_mut(&id) else {
            return Ok(None);
        };

        // Work on a copy so an unchanged record is never rewritten.
        let mut candidate = stored.clone();
        if apply(&mut candidate) {
            *stored = candidate.clone();
        }
        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaAsset;

    fn asset() -> MediaAsset {
        MediaAsset::new(Uuid::new_v4(), "clip.mp4", "/tmp/clip.mp4", "mp4", 1024)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = MemoryRepository::new();
        let a = asset();
        repo.save(&a).await.unwrap();

        let found = repo.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(found.filename, "clip.mp4");
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_with_skips_write_when_unchanged() {
        let repo = MemoryRepository::new();
        let a = asset();
        repo.save(&a).await.unwrap();

        let result = repo
            .update_with(a.id, &|r: &mut MediaAsset| {
                r.filename = "renamed.mp4".into();
                false
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.filename, "renamed.mp4");

        let stored = repo.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(stored.filename, "clip.mp4");
    }

    #[tokio::test]
    async fn test_find_by_status_filters() {
        let repo = MemoryRepository::new();
        let mut failed = asset();
        failed.status = LifecycleStatus::Error;
        repo.save(&failed).await.unwrap();
        repo.save(&asset()).await.unwrap();

        let errors = repo.find_by_status(LifecycleStatus::Error).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, failed.id);
    }
}

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::{Path, PathBuf};
use tracing::info;

/// Highest version suffix tried before giving up on a name.
const MAX_VERSIONS: u32 = 1000;

/// Durable storage for assets and batch artifacts.
///
/// Uploading to a name that is already taken never overwrites: the store
/// picks the next free versioned name (`clip-v2.mp4`, `clip-v3.mp4`, ...).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file under `logical_name`; returns its durable URL.
    async fn upload(&self, local: &Path, logical_name: &str) -> Result<String, StorageError>;

    /// Fetch the object at `url` into `local`.
    async fn download(&self, url: &str, local: &Path) -> Result<(), StorageError>;

    async fn exists(&self, logical_name: &str) -> Result<bool, StorageError>;
}

/// First name in `logical_name`, `stem-v2.ext`, `stem-v3.ext`, ... not yet
/// present in `store`.
pub async fn next_free_name<S: BlobStore + ?Sized>(
    store: &S,
    logical_name: &str,
) -> Result<String, StorageError> {
    if !store.exists(logical_name).await? {
        return Ok(logical_name.to_string());
    }

    let (stem, ext) = match logical_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.ends_with('/') => (stem, Some(ext)),
        _ => (logical_name, None),
    };
    for version in 2..=MAX_VERSIONS {
        let candidate = match ext {
            Some(ext) => format!("{stem}-v{version}.{ext}"),
            None => format!("{stem}-v{version}"),
        };
        if !store.exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(StorageError::NoFreeName(logical_name.to_string()))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("gif") => "image/gif",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

/// Client for S3-compatible object storage.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    bucket_name: String,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
        })
    }

    fn key_from_url<'a>(&self, url: &'a str) -> Result<&'a str, StorageError> {
        url.strip_prefix("s3://")
            .and_then(|rest| rest.strip_prefix(self.bucket_name.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))
    }
}

fn check_status(status: u16, key: &str) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Rejected {
            status,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, local: &Path, logical_name: &str) -> Result<String, StorageError> {
        let key = next_free_name(self, logical_name).await?;
        let data = tokio::fs::read(local).await?;

        let response = self
            .bucket
            .put_object_with_content_type(&key, &data, content_type_for(&key))
            .await?;
        check_status(response.status_code(), &key)?;

        info!(key = %key, bytes = data.len(), "Uploaded object");
        Ok(format!("s3://{}/{}", self.bucket_name, key))
    }

    async fn download(&self, url: &str, local: &Path) -> Result<(), StorageError> {
        let key = self.key_from_url(url)?;
        let response = self.bucket.get_object(key).await?;
        check_status(response.status_code(), key)?;
        tokio::fs::write(local, response.bytes()).await?;
        Ok(())
    }

    async fn exists(&self, logical_name: &str) -> Result<bool, StorageError> {
        let (_, status) = self.bucket.head_object(logical_name).await?;
        match status {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(StorageError::Rejected {
                status,
                key: logical_name.to_string(),
            }),
        }
    }
}

/// Directory-backed store for standalone deployments.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, logical_name: &str) -> Result<PathBuf, StorageError> {
        if logical_name.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StorageError::InvalidUrl(logical_name.to_string()));
        }
        Ok(self.root.join(logical_name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, local: &Path, logical_name: &str) -> Result<String, StorageError> {
        let name = next_free_name(self, logical_name).await?;
        let target = self.path_for(&name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        Ok(format!("local://{name}"))
    }

    async fn download(&self, url: &str, local: &Path) -> Result<(), StorageError> {
        let name = url
            .strip_prefix("local://")
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
        tokio::fs::copy(self.path_for(name)?, local).await?;
        Ok(())
    }

    async fn exists(&self, logical_name: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path_for(logical_name)?).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage rejected {key} with status {status}")]
    Rejected { status: u16, key: String },

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Not a storage URL: {0}")]
    InvalidUrl(String),

    #[error("No free versioned name left for {0}")]
    NoFreeName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

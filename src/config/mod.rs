use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Ignored by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it records live in memory.
    pub database_url: Option<String>,

    /// Redis connection string for the notification broker. Without it the
    /// broker is in-process and the server runs the consumers and sweep itself.
    pub redis_url: Option<String>,

    /// S3-compatible bucket for durable storage
    pub s3_bucket: Option<String>,

    /// S3 endpoint URL
    pub s3_endpoint: Option<String>,

    /// S3 access key ID
    pub s3_access_key: Option<String>,

    /// S3 secret access key
    pub s3_secret_key: Option<String>,

    /// Directory-backed durable storage used when S3 is not configured
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Working directory for uploads and intermediate stage outputs
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Failures before a record becomes `failed_permanently`
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Handler attempts per notification before dead-lettering
    #[serde(default = "default_consumer_max_attempts")]
    pub consumer_max_attempts: u32,

    #[serde(default = "default_consumer_retry_delay_ms")]
    pub consumer_retry_delay_ms: u64,

    #[serde(default = "default_consumer_poll_interval_ms")]
    pub consumer_poll_interval_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Wall-clock limit for a single ffmpeg invocation
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,

    #[serde(default = "default_upload_queue_capacity")]
    pub upload_queue_capacity: usize,

    /// Request body limit for uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// S3 settings, present only when all four are configured.
pub struct S3Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data/storage")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./data/scratch")
}

fn default_max_retries() -> i32 {
    3
}

fn default_consumer_max_attempts() -> u32 {
    3
}

fn default_consumer_retry_delay_ms() -> u64 {
    1000
}

fn default_consumer_poll_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_engine_timeout_secs() -> u64 {
    300
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_upload_workers() -> usize {
    4
}

fn default_upload_queue_capacity() -> usize {
    32
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn s3(&self) -> Option<S3Settings<'_>> {
        Some(S3Settings {
            bucket: self.s3_bucket.as_deref()?,
            endpoint: self.s3_endpoint.as_deref()?,
            access_key: self.s3_access_key.as_deref()?,
            secret_key: self.s3_secret_key.as_deref()?,
        })
    }

    /// Without Redis there is no separate worker process to hand off to.
    pub fn standalone(&self) -> bool {
        self.redis_url.is_none()
    }

    pub fn consumer_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.consumer_max_attempts,
            Duration::from_millis(self.consumer_retry_delay_ms),
        )
    }

    pub fn consumer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

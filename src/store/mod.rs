pub(crate) mod s3;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

pub use s3::S3Gateway;

/// Listing metadata for one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
}

/// The object-store operations the orchestrator needs. The S3 gateway is the
/// production implementation; tests swap in an in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, file_path: &Path) -> Result<()>;

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;

    async fn presign(&self, bucket: &str, key: &str, expiration: Duration) -> Result<String>;

    async fn ensure_bucket(&self, name: &str, region: Option<&str>, public: bool) -> Result<bool>;

    async fn set_bucket_visibility(&self, name: &str, public: bool) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<String>>;
}

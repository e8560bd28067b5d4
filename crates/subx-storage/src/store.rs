//! The object store abstraction.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageResult;

/// Default expiry for presigned URLs (1 hour).
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Maximum allowed expiry (7 days), the S3 SigV4 ceiling.
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604800;

/// Clamp a requested expiry into `1..=MAX_PRESIGN_EXPIRY_SECS`.
pub fn clamp_expiry(expires_in: Duration) -> Duration {
    Duration::from_secs(expires_in.as_secs().clamp(1, MAX_PRESIGN_EXPIRY_SECS))
}

/// A listed object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    /// Size in bytes
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Object metadata from a HEAD request.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectHead {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectListing {
    pub objects: Vec<ObjectInfo>,
    /// More objects exist past `max_keys`
    pub truncated: bool,
}

/// Operations the API and the worker need from a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `r2`, `b2` or `local`.
    fn provider_name(&self) -> &'static str;

    /// Upload bytes, returning the stored size.
    async fn upload_bytes(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> StorageResult<u64>;

    /// Upload a file from disk, returning the stored size.
    async fn upload_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<u64>;

    async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Download to `path`, creating parent directories. Returns the size written.
    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<u64>;

    /// Delete one object. Returns false when it did not exist.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Delete several objects, returning how many were removed.
    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn head(&self, key: &str) -> StorageResult<ObjectHead>;

    /// List objects under `prefix`. `None` lists everything.
    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<ObjectListing>;

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Time-limited download URL.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Time-limited upload URL for a direct client PUT.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;

    /// Public URL when the bucket sits behind a CDN.
    fn cdn_url(&self, _key: &str) -> Option<String> {
        None
    }
}

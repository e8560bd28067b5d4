//! S3-compatible store for Cloudflare R2 and Backblaze B2.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use subx_models::StorageProvider;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::store::{clamp_expiry, ObjectHead, ObjectInfo, ObjectListing, ObjectStore};

/// Keys per DeleteObjects request (S3 limit).
const DELETE_BATCH: usize = 1000;

/// S3 client bound to one bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    config: StorageConfig,
}

fn to_chrono(t: &AwsDateTime) -> Option<DateTime<Utc>> {
    t.to_millis().ok().and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn clean_etag(etag: Option<&str>) -> Option<String> {
    etag.map(|e| e.trim_matches('"').to_string())
}

fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404")
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            config.provider.as_str(),
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name.clone(),
            config,
        }
    }

    /// System R2 bucket from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Ok(Self::new(StorageConfig::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn provider(&self) -> StorageProvider {
        self.config.provider
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn provider_name(&self) -> &'static str {
        self.config.provider.as_str()
    }

    async fn upload_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<u64> {
        let size = data.len() as u64;
        debug!("Uploading {} bytes to {}", size, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(size)
    }

    async fn upload_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<u64> {
        debug!("Uploading {} to {}", path.display(), key);
        let size = tokio::fs::metadata(path).await?.len();

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(key, size, "Uploaded {}", path.display());
        Ok(size)
    }

    async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if is_not_found(&message) {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(message)
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let bytes = self.download_bytes(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::DownloadFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let size = bytes.len() as u64;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("Failed to write file: {}", e)))?;

        info!(key, size, "Downloaded to {}", path.display());
        Ok(size)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        // S3 does not report whether the key existed
        Ok(true)
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32> {
        let mut deleted = 0u32;

        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| StorageError::delete_failed(e.to_string()))
                })
                .collect::<StorageResult<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            deleted += batch.len() as u32;
        }

        if deleted > 0 {
            info!("Deleted {} objects", deleted);
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectHead> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if is_not_found(&message) {
                    StorageError::not_found(key)
                } else {
                    StorageError::AwsSdk(message)
                }
            })?;

        Ok(ObjectHead {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
            last_modified: response.last_modified().and_then(to_chrono),
            etag: clean_etag(response.e_tag()),
        })
    }

    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<ObjectListing> {
        debug!("Listing objects with prefix: {}", prefix);

        let mut listing = ObjectListing::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if !prefix.is_empty() {
                request = request.prefix(prefix);
            }
            if let Some(max) = max_keys {
                let remaining = max.saturating_sub(listing.objects.len()).max(1);
                request = request.max_keys(remaining.min(1000) as i32);
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            for obj in response.contents() {
                listing.objects.push(ObjectInfo {
                    key: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().and_then(to_chrono),
                    etag: clean_etag(obj.e_tag()),
                });
            }

            let more = response.is_truncated() == Some(true);
            if let Some(max) = max_keys {
                if listing.objects.len() >= max {
                    listing.truncated = more || listing.objects.len() > max;
                    listing.objects.truncate(max);
                    break;
                }
            }
            if !more {
                break;
            }
            continuation_token = response.next_continuation_token().map(str::to_string);
        }

        Ok(listing)
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        let source = format!("{}/{}", self.bucket, urlencoding::encode(from_key));

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(to_key)
            .send()
            .await
            .map_err(|e| StorageError::CopyFailed(e.to_string()))?;

        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(clamp_expiry(expires_in))
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(clamp_expiry(expires_in))
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("403") || message.contains("Forbidden") {
                    StorageError::AccessDenied(format!("bucket {}", self.bucket))
                } else if is_not_found(&message) {
                    StorageError::not_found(format!("bucket {}", self.bucket))
                } else {
                    StorageError::AwsSdk(format!(
                        "{} connectivity check failed: {}",
                        self.config.provider.as_str(),
                        message
                    ))
                }
            })?;
        Ok(())
    }

    fn cdn_url(&self, key: &str) -> Option<String> {
        self.config.cdn_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        let config = StorageConfig::r2(Some("acct"), None, "key", "secret", "bucket")
            .unwrap()
            .with_cdn_domain(Some("cdn.example.com".to_string()));
        S3Store::new(config)
    }

    #[test]
    fn test_helpers() {
        assert_eq!(clean_etag(Some("\"abc\"")).as_deref(), Some("abc"));
        assert!(is_not_found("service error: NoSuchKey"));
        assert!(!is_not_found("timeout"));
    }

    #[test]
    fn test_store_metadata() {
        let store = store();
        assert_eq!(store.bucket(), "bucket");
        assert_eq!(store.provider_name(), "r2");
        assert_eq!(
            store.cdn_url("users/u/p/export/o.mp4").as_deref(),
            Some("https://cdn.example.com/users/u/p/export/o.mp4")
        );
    }

    #[tokio::test]
    async fn test_presign_is_offline_and_path_style() {
        let store = store();
        let url = store
            .presign_put("uploads/x/a.mkv", "video/x-matroska", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.starts_with("https://acct.r2.cloudflarestorage.com/bucket/uploads/x/a.mkv?"));
        assert!(url.contains("X-Amz-Expires=900"));

        let get = store.presign_get("k.srt", Duration::from_secs(10 * 86400)).await.unwrap();
        assert!(get.contains("X-Amz-Expires=604800"));
    }
}

//! Helpers for a user's own R2 or B2 bucket.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::config::UserBucketConfig;
use crate::error::{StorageError, StorageResult};
use crate::s3::S3Store;
use crate::store::{ObjectHead, ObjectListing, ObjectStore};

/// Probe object written by a connection test.
pub const CONNECTION_TEST_KEY: &str = ".subtranslate-connection-test";

const CONNECTION_TEST_BODY: &[u8] = b"subtranslate-test";

/// Maximum number of objects a listing returns.
pub const MAX_LIST_KEYS: usize = 200;

/// Outcome shown to the user after testing their bucket.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
}

impl ConnectionTest {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// A user-configured bucket.
#[derive(Clone)]
pub struct UserBucket {
    store: S3Store,
    label: &'static str,
}

impl UserBucket {
    pub fn new(config: &UserBucketConfig) -> StorageResult<Self> {
        let storage_config = config.to_storage_config()?;
        let label = match storage_config.provider {
            subx_models::StorageProvider::R2 => "Cloudflare R2",
            subx_models::StorageProvider::B2 => "Backblaze B2",
        };
        Ok(Self {
            store: S3Store::new(storage_config),
            label,
        })
    }

    pub fn store(&self) -> &S3Store {
        &self.store
    }

    /// Head the bucket, write a probe object, then remove it.
    pub async fn test_connection(&self) -> ConnectionTest {
        match self.store.check_connectivity().await {
            Ok(()) => {}
            Err(StorageError::AccessDenied(_)) => {
                return ConnectionTest::failed("Access denied: check the API keys")
            }
            Err(StorageError::NotFound(_)) => {
                return ConnectionTest::failed(format!(
                    "Bucket not found: {}",
                    self.store.bucket()
                ))
            }
            Err(e) => return ConnectionTest::failed(truncate(&e.to_string())),
        }

        if let Err(e) = self
            .store
            .upload_bytes(CONNECTION_TEST_KEY, CONNECTION_TEST_BODY.to_vec(), "text/plain")
            .await
        {
            return ConnectionTest::failed(format!("No write permission: {}", truncate(&e.to_string())));
        }

        if let Err(e) = self.store.delete(CONNECTION_TEST_KEY).await {
            warn!(error = %e, "Could not remove connection test object");
        }

        ConnectionTest {
            ok: true,
            message: format!("{} connection successful (bucket: {})", self.label, self.store.bucket()),
        }
    }

    pub async fn list(&self, prefix: &str) -> StorageResult<ObjectListing> {
        self.store.list(prefix, Some(MAX_LIST_KEYS)).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.store.delete(key).await.map(|_| ())
    }

    /// Copy to the new key, then delete the old one.
    pub async fn rename(&self, old_key: &str, new_key: &str) -> StorageResult<()> {
        if old_key == new_key {
            return Ok(());
        }
        self.store.copy(old_key, new_key).await?;
        self.store.delete(old_key).await?;
        Ok(())
    }

    pub async fn file_info(&self, key: &str) -> StorageResult<ObjectHead> {
        self.store.head(key).await
    }

    /// Download URL for an existing object.
    pub async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if !self.store.exists(key).await? {
            return Err(StorageError::not_found(key));
        }
        self.store.presign_get(key, expires_in).await
    }
}

fn truncate(message: &str) -> String {
    message.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use subx_models::StorageProvider;

    #[test]
    fn test_new_requires_bucket() {
        let config = UserBucketConfig {
            provider: StorageProvider::R2,
            r2_account_id: Some("acct".to_string()),
            ..Default::default()
        };
        assert!(UserBucket::new(&config).is_err());

        let config = UserBucketConfig {
            r2_bucket_name: Some("media".to_string()),
            ..config
        };
        let bucket = UserBucket::new(&config).unwrap();
        assert_eq!(bucket.store().bucket(), "media");
        assert_eq!(bucket.label, "Cloudflare R2");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate(&"x".repeat(500)).len(), 200);
    }
}

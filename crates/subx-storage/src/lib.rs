//! Object storage for SubTranslate.
//!
//! This crate provides:
//! - The `ObjectStore` trait shared by the API and the worker
//! - `S3Store` for Cloudflare R2 and Backblaze B2 buckets
//! - `LocalStore` for filesystem-backed development setups
//! - Presigned GET/PUT URLs (S3 signatures or HMAC file tokens)
//! - The object key layout and user-bucket helpers

pub mod config;
pub mod error;
pub mod keys;
pub mod local;
pub mod s3;
pub mod store;
pub mod token;
pub mod user_bucket;

pub use config::{b2_region, StorageConfig, UserBucketConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use s3::S3Store;
pub use store::{
    clamp_expiry, ObjectHead, ObjectInfo, ObjectListing, ObjectStore, DEFAULT_PRESIGN_EXPIRY_SECS,
    MAX_PRESIGN_EXPIRY_SECS,
};
pub use token::{FileToken, TokenMethod};
pub use user_bucket::{ConnectionTest, UserBucket};

use std::sync::Arc;

/// Build the system store from the environment.
///
/// `STORAGE_DIR` selects the local filesystem; otherwise the R2 bucket is used.
pub async fn store_from_env() -> StorageResult<Arc<dyn ObjectStore>> {
    match std::env::var("STORAGE_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let secret = std::env::var("FILE_URL_SECRET")
                .map_err(|_| StorageError::config_error("FILE_URL_SECRET not set"))?;
            let base_url = std::env::var("PUBLIC_BASE_URL").unwrap_or_default();
            Ok(Arc::new(LocalStore::new(dir, secret, base_url).await?))
        }
        None => Ok(Arc::new(S3Store::from_env().await?)),
    }
}

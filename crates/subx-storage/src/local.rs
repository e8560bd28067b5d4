//! Filesystem-backed object store.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::keys::content_type_for;
use crate::store::{clamp_expiry, ObjectHead, ObjectInfo, ObjectListing, ObjectStore};
use crate::token::{FileToken, TokenMethod};

/// Stores objects as files under a root directory.
///
/// Presigned URLs point at the API's `/files/{key}` route and carry an
/// HMAC token instead of an S3 signature.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    secret: String,
    /// Prefix for generated URLs; empty gives relative URLs
    base_url: String,
}

impl LocalStore {
    pub async fn new(
        root: impl AsRef<Path>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        info!(root = %root.display(), "Local storage initialized");

        Ok(Self {
            root,
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, rejecting traversal.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty() || relative.is_absolute() {
            return Err(StorageError::invalid_key(key));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::invalid_key(key)),
            }
        }
        Ok(self.root.join(relative))
    }

    /// Check a `/files` token for `key` and `method`.
    pub fn verify_token(&self, token: &str, key: &str, method: TokenMethod) -> StorageResult<bool> {
        FileToken::verify_for(token, &self.secret, key, method)
    }

    fn signed_url(
        &self,
        key: &str,
        method: TokenMethod,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.path_for(key)?;

        let mut token = FileToken::new(key, method, clamp_expiry(expires_in));
        if let Some(ct) = content_type {
            token = token.with_content_type(ct);
        }
        let signed = token.sign(&self.secret)?;

        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}/files/{}?token={}&method={}",
            self.base_url,
            encoded_key,
            signed,
            method.as_str()
        ))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Remove empty directories left behind by a delete.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn modified_at(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn provider_name(&self) -> &'static str {
        "local"
    }

    async fn upload_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<u64> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        let size = data.len() as u64;
        tokio::fs::write(&path, data).await?;
        debug!(key, size, "Stored object");
        Ok(size)
    }

    async fn upload_file(&self, key: &str, source: &Path, _content_type: &str) -> StorageResult<u64> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        let size = tokio::fs::copy(source, &path).await?;
        info!(key, size, "Stored file");
        Ok(size)
    }

    async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn download_file(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::not_found(key));
        }
        Self::ensure_parent(dest).await?;
        Ok(tokio::fs::copy(&path, dest).await?)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                self.prune_empty_parents(&path).await;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectHead> {
        let path = self.path_for(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .ok()
            .filter(|m| m.is_file())
            .ok_or_else(|| StorageError::not_found(key))?;

        Ok(ObjectHead {
            key: key.to_string(),
            size: meta.len(),
            content_type: content_type_for(key).to_string(),
            last_modified: modified_at(&meta),
            etag: None,
        })
    }

    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<ObjectListing> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::ListFailed(e.to_string())),
            };

            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    objects.push(ObjectInfo {
                        key,
                        size: meta.len(),
                        last_modified: modified_at(&meta),
                        etag: None,
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let truncated = max_keys.is_some_and(|max| objects.len() > max);
        if let Some(max) = max_keys {
            objects.truncate(max);
        }

        Ok(ObjectListing { objects, truncated })
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        let from = self.path_for(from_key)?;
        let to = self.path_for(to_key)?;
        if !tokio::fs::try_exists(&from).await? {
            return Err(StorageError::not_found(from_key));
        }
        Self::ensure_parent(&to).await?;
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| StorageError::CopyFailed(e.to_string()))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.signed_url(key, TokenMethod::Get, None, expires_in)
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.signed_url(key, TokenMethod::Put, Some(content_type), expires_in)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        let meta = tokio::fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StorageError::config_error(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn cdn_url(&self, key: &str) -> Option<String> {
        Some(format!("{}/files/{}", self.base_url, key))
    }
}

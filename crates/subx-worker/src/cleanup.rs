//! Retention cleanup and storage quota bookkeeping.
//!
//! Used by the worker's scheduler and by the API before accepting uploads.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use subx_db::{Store, StoredFileQuery, StoredFileRow};
use subx_models::{FileType, ProjectId};
use subx_storage::ObjectStore;

use crate::error::WorkerResult;
use crate::metrics;

/// Quota snapshot for a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageCheck {
    pub ok: bool,
    pub used: u64,
    pub max: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedFile {
    pub id: String,
    pub file_type: FileType,
    pub size: u64,
    pub project_id: Option<ProjectId>,
}

/// Result of making room for an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsureStorage {
    pub ok: bool,
    pub used: u64,
    pub max: u64,
    pub available: u64,
    pub freed_bytes: u64,
    pub deleted_files: Vec<DeletedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Human readable size: B, KB and MB with one decimal, GB with two.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}

/// Whether a worker currently owns the project's files. Lookup errors count as idle.
async fn project_is_active(
    store: &dyn Store,
    cache: &mut HashMap<ProjectId, bool>,
    project_id: Option<&ProjectId>,
) -> bool {
    let Some(id) = project_id else {
        return false;
    };
    if let Some(active) = cache.get(id) {
        return *active;
    }
    let active = match store.get_project(id).await {
        Ok(Some(project)) => project.status.is_busy(),
        _ => false,
    };
    cache.insert(id.clone(), active);
    active
}

/// Sum the user's managed files and store the total on the profile.
pub async fn recalculate_user_storage(store: &dyn Store, user_id: &str) -> WorkerResult<u64> {
    let files = store
        .list_stored_files(&StoredFileQuery::for_user(user_id).managed())
        .await?;
    let total: i64 = files.iter().map(|f| f.file_size_bytes.max(0)).sum();
    store.set_storage_used(user_id, total).await?;
    Ok(total as u64)
}

/// Delete expired managed files outside busy projects.
///
/// Returns the number of files removed. A failure on one file is logged and
/// the rest continue.
pub async fn cleanup_expired_files(
    store: &dyn Store,
    objects: &dyn ObjectStore,
) -> WorkerResult<u64> {
    let expired = store.list_expired_stored_files(Utc::now()).await?;
    if expired.is_empty() {
        info!("No expired files");
        return Ok(0);
    }

    let mut active = HashMap::new();
    let mut users = BTreeSet::new();
    let mut deleted = 0u64;
    let mut freed = 0u64;

    for file in &expired {
        users.insert(file.user_id.clone());
        if project_is_active(store, &mut active, file.project_id.as_ref()).await {
            continue;
        }
        match delete_file(store, objects, file).await {
            Ok(()) => {
                deleted += 1;
                freed += file.file_size_bytes.max(0) as u64;
            }
            Err(e) => warn!(file_id = %file.id, "Cleanup failed for file: {}", e),
        }
    }

    for user_id in &users {
        if let Err(e) = recalculate_user_storage(store, user_id).await {
            warn!(user_id = %user_id, "Storage recalculation failed: {}", e);
        }
    }

    metrics::record_files_cleaned(deleted);
    info!(deleted, freed = %format_bytes(freed), "Cleanup completed");
    Ok(deleted)
}

async fn delete_file(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    file: &StoredFileRow,
) -> WorkerResult<()> {
    objects.delete(&file.storage_path).await?;
    store.delete_stored_files(std::slice::from_ref(&file.id)).await?;
    Ok(())
}

/// Current usage against the plan limit.
pub async fn check_storage_limit(store: &dyn Store, user_id: &str) -> WorkerResult<StorageCheck> {
    let (used, max) = usage(store, user_id).await?;
    Ok(StorageCheck {
        ok: used < max,
        used,
        max,
        available: max.saturating_sub(used),
    })
}

async fn usage(store: &dyn Store, user_id: &str) -> WorkerResult<(u64, u64)> {
    let profile = store
        .get_profile(user_id)
        .await?
        .ok_or_else(|| crate::error::WorkerError::not_found(format!("profile {}", user_id)))?;
    let plan = store.plan_for_profile(&profile).await?;
    Ok((profile.storage_used_bytes.max(0) as u64, plan.storage_limit_bytes()))
}

/// Make room for `incoming` bytes, deleting the oldest managed files first.
///
/// Files of busy projects are never touched. `ok` is false when even after
/// deleting everything eligible the upload still does not fit.
pub async fn ensure_storage_for_upload(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    user_id: &str,
    incoming: u64,
) -> WorkerResult<EnsureStorage> {
    let (used, max) = usage(store, user_id).await?;
    let available = max.saturating_sub(used);
    if available >= incoming {
        return Ok(EnsureStorage {
            ok: true,
            used,
            max,
            available,
            freed_bytes: 0,
            deleted_files: Vec::new(),
            warning: None,
        });
    }

    let need_to_free = incoming - available;
    let files = store
        .list_stored_files(&StoredFileQuery::for_user(user_id).managed().oldest_first())
        .await?;

    let mut active = HashMap::new();
    let mut freed = 0u64;
    let mut deleted_files = Vec::new();

    for file in &files {
        if freed >= need_to_free {
            break;
        }
        if project_is_active(store, &mut active, file.project_id.as_ref()).await {
            continue;
        }
        match delete_file(store, objects, file).await {
            Ok(()) => {
                let size = file.file_size_bytes.max(0) as u64;
                freed += size;
                deleted_files.push(DeletedFile {
                    id: file.id.clone(),
                    file_type: file.file_type,
                    size,
                    project_id: file.project_id.clone(),
                });
            }
            Err(e) => warn!(file_id = %file.id, "Could not free file: {}", e),
        }
    }

    let used = recalculate_user_storage(store, user_id).await?;
    let available = max.saturating_sub(used);
    let warning = (!deleted_files.is_empty()).then(|| {
        format!(
            "Storage was full: removed {} old file(s), freed {}",
            deleted_files.len(),
            format_bytes(freed)
        )
    });

    info!(
        user_id,
        freed = %format_bytes(freed),
        deleted = deleted_files.len(),
        "Freed storage for upload"
    );

    Ok(EnsureStorage {
        ok: available >= incoming,
        used,
        max,
        available,
        freed_bytes: freed,
        deleted_files,
        warning,
    })
}

/// Flag a project's files as copied to the user's bucket, taking them out of
/// cleanup and the quota.
pub async fn mark_uploaded_to_user_storage(
    store: &dyn Store,
    user_id: &str,
    project_id: &ProjectId,
) -> WorkerResult<u64> {
    let updated = store.update_stored_files_for_project(project_id, true).await?;
    recalculate_user_storage(store, user_id).await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use subx_db::{MemoryStore, ProfileRow, ProjectRow};
    use subx_models::{Plan, ProjectStatus};
    use subx_storage::LocalStore;

    const MB: i64 = 1024 * 1024;

    async fn setup() -> (tempfile::TempDir, Arc<MemoryStore>, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalStore::new(dir.path(), "secret", "").await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut plan = Plan::free();
        plan.id = "tiny".into();
        plan.storage_gb = 10.0 / 1024.0; // 10 MB
        store.put_plan(plan).await;
        let mut profile = ProfileRow::new("u1", None);
        profile.plan_id = "tiny".into();
        store.put_profile(profile).await;
        (dir, store, objects)
    }

    async fn add_file(
        store: &MemoryStore,
        objects: &LocalStore,
        project: &ProjectId,
        name: &str,
        size: i64,
        age_secs: i64,
    ) -> StoredFileRow {
        let key = format!("users/u1/{}/source/{}", project, name);
        objects.upload_bytes(&key, vec![0u8; 4], "video/mp4").await.unwrap();
        let mut row = StoredFileRow::new("u1", Some(project.clone()), FileType::SourceVideo, key, size);
        row.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
        store.insert_stored_file(&row).await.unwrap()
    }

    async fn add_project(store: &MemoryStore, status: ProjectStatus) -> ProjectId {
        let mut project = ProjectRow::new("u1", "p");
        project.status = status;
        store.insert_project(&project).await.unwrap().id
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
    }

    #[tokio::test]
    async fn test_recalculate_ignores_copied_files() {
        let (_dir, store, objects) = setup().await;
        let project = add_project(&store, ProjectStatus::Ready).await;
        add_file(&store, &objects, &project, "a.mkv", 3 * MB, 10).await;
        add_file(&store, &objects, &project, "b.mkv", 2 * MB, 5).await;

        assert_eq!(recalculate_user_storage(store.as_ref(), "u1").await.unwrap(), 5 * MB as u64);

        mark_uploaded_to_user_storage(store.as_ref(), "u1", &project).await.unwrap();
        assert_eq!(recalculate_user_storage(store.as_ref(), "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_storage_limit() {
        let (_dir, store, objects) = setup().await;
        let project = add_project(&store, ProjectStatus::Ready).await;
        add_file(&store, &objects, &project, "a.mkv", 4 * MB, 10).await;
        recalculate_user_storage(store.as_ref(), "u1").await.unwrap();

        let check = check_storage_limit(store.as_ref(), "u1").await.unwrap();
        assert!(check.ok);
        assert_eq!(check.used, 4 * MB as u64);
        assert_eq!(check.max, 10 * MB as u64);
        assert_eq!(check.available, 6 * MB as u64);
    }

    #[tokio::test]
    async fn test_ensure_storage_frees_oldest_first_and_skips_busy() {
        let (_dir, store, objects) = setup().await;
        let idle = add_project(&store, ProjectStatus::Exported).await;
        let busy = add_project(&store, ProjectStatus::Translating).await;
        let busy_file = add_file(&store, &objects, &busy, "busy.mkv", 3 * MB, 300).await;
        let oldest = add_file(&store, &objects, &idle, "old.mkv", 3 * MB, 200).await;
        let newer = add_file(&store, &objects, &idle, "new.mkv", 3 * MB, 100).await;
        recalculate_user_storage(store.as_ref(), "u1").await.unwrap();

        // 9 MB used, 1 MB free; 3 MB incoming needs one file removed
        let result = ensure_storage_for_upload(store.as_ref(), &objects, "u1", 3 * MB as u64)
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.deleted_files.len(), 1);
        assert_eq!(result.deleted_files[0].id, oldest.id);
        assert_eq!(result.freed_bytes, 3 * MB as u64);
        assert!(result.warning.is_some());

        let remaining: Vec<String> = store.stored_files().await.into_iter().map(|f| f.id).collect();
        assert!(remaining.contains(&busy_file.id));
        assert!(remaining.contains(&newer.id));
        assert!(!objects.exists(&oldest.storage_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_storage_reports_not_ok_when_too_big() {
        let (_dir, store, objects) = setup().await;
        let result = ensure_storage_for_upload(store.as_ref(), &objects, "u1", 50 * MB as u64)
            .await
            .unwrap();
        assert!(!result.ok);
        assert!(result.deleted_files.is_empty());
        assert!(result.warning.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired_files() {
        let (_dir, store, objects) = setup().await;
        let idle = add_project(&store, ProjectStatus::Ready).await;
        let busy = add_project(&store, ProjectStatus::Exporting).await;

        let mut expired = add_file(&store, &objects, &idle, "x.mkv", MB, 10).await;
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.delete_stored_files(std::slice::from_ref(&expired.id)).await.unwrap();
        store.insert_stored_file(&expired).await.unwrap();

        let mut busy_expired = add_file(&store, &objects, &busy, "y.mkv", MB, 10).await;
        busy_expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.delete_stored_files(std::slice::from_ref(&busy_expired.id)).await.unwrap();
        store.insert_stored_file(&busy_expired).await.unwrap();

        let fresh = add_file(&store, &objects, &idle, "z.mkv", MB, 10).await;

        let deleted = cleanup_expired_files(store.as_ref(), &objects).await.unwrap();
        assert_eq!(deleted, 1);

        let ids: Vec<String> = store.stored_files().await.into_iter().map(|f| f.id).collect();
        assert!(!ids.contains(&expired.id));
        assert!(ids.contains(&busy_expired.id));
        assert!(ids.contains(&fresh.id));

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.storage_used_bytes, 2 * MB);
    }
}

//! Job handlers.
//!
//! Each handler does the work for one job kind and returns the result to be
//! stored on the job row. Queue bookkeeping (ack, retry, DLQ) stays in the
//! executor.

pub mod export;
pub mod extract;
pub mod translate;

use std::path::Path;

use tempfile::TempDir;
use tracing::warn;

use subx_db::{ProjectPatch, StoredFileRow};
use subx_models::{FileType, JobId, JobKind, JobResult, Plan, ProjectId, ProjectStatus};
use subx_queue::QueueJob;
use subx_storage::StorageError;

use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig};

pub use export::export_video;
pub use extract::extract_tracks;
pub use translate::translate_subtitles;

/// Run the handler for `job`.
pub async fn process_job(ctx: &ProcessingContext, job: &QueueJob) -> WorkerResult<JobResult> {
    match job {
        QueueJob::ExtractTracks(j) => extract_tracks(ctx, j).await,
        QueueJob::TranslateSubtitles(j) => translate_subtitles(ctx, j).await,
        QueueJob::ExportVideo(j) => export_video(ctx, j).await,
    }
}

/// Effects that only apply once the job's completion has been recorded.
pub async fn settle_job(ctx: &ProcessingContext, job: &QueueJob, result: &JobResult) {
    if let QueueJob::TranslateSubtitles(j) = job {
        translate::bill_lines(ctx, j, result.translated_lines.unwrap_or(0)).await;
    }
}

/// Project status after a job gave up or was cancelled.
pub fn restore_patch(kind: JobKind, error: &str) -> ProjectPatch {
    match kind {
        JobKind::Extract => ProjectPatch::failed(error),
        JobKind::Translate => ProjectPatch::status(ProjectStatus::Ready),
        JobKind::Export => ProjectPatch::status(ProjectStatus::Translated),
    }
    .touch()
}

/// Put the project back into a usable state. Best effort.
pub async fn restore_project(ctx: &ProcessingContext, job: &QueueJob, error: &str) {
    let patch = restore_patch(job.kind(), error);
    if let Err(e) = ctx.store.update_project(job.project_id(), &patch).await {
        warn!(project_id = %job.project_id(), "Failed to restore project status: {}", e);
    }
}

/// Scratch directory for one job, removed on drop.
pub(crate) async fn job_workspace(ctx: &ProcessingContext, job_id: &JobId) -> WorkerResult<TempDir> {
    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", job_id))
        .tempdir_in(&ctx.config.work_dir)?;
    Ok(dir)
}

fn transfer_retryable(e: &StorageError) -> bool {
    !e.is_not_found() && !matches!(e, StorageError::InvalidKey(_) | StorageError::ConfigError(_))
}

pub(crate) async fn download_to(
    ctx: &ProcessingContext,
    key: &str,
    dest: &Path,
) -> WorkerResult<u64> {
    let config = RetryConfig::new(format!("download {}", key));
    let size = retry_async(&config, transfer_retryable, || {
        ctx.objects.download_file(key, dest)
    })
    .await
    .into_result()?;
    Ok(size)
}

pub(crate) async fn upload_from(
    ctx: &ProcessingContext,
    key: &str,
    path: &Path,
    content_type: &str,
) -> WorkerResult<u64> {
    let config = RetryConfig::new(format!("upload {}", key));
    let size = retry_async(&config, transfer_retryable, || {
        ctx.objects.upload_file(key, path, content_type)
    })
    .await
    .into_result()?;
    Ok(size)
}

/// Record an uploaded object for quota and retention.
pub(crate) async fn record_stored_file(
    ctx: &ProcessingContext,
    user_id: &str,
    project_id: &ProjectId,
    file_type: FileType,
    key: &str,
    size: u64,
    plan: &Plan,
) -> WorkerResult<()> {
    let row = StoredFileRow::new(user_id, Some(project_id.clone()), file_type, key, size as i64)
        .with_retention_days(plan.retention_days)
        .with_cdn_url(ctx.objects.cdn_url(key));
    ctx.store.insert_stored_file(&row).await?;
    Ok(())
}

/// Lowercased extension including the dot, or an empty string.
pub(crate) fn dotted_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub(crate) fn project_not_found(project_id: &ProjectId) -> WorkerError {
    WorkerError::not_found(format!("project {}", project_id))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_patch_per_kind() {
        let patch = restore_patch(JobKind::Extract, "ffprobe failed");
        assert_eq!(patch.status, Some(ProjectStatus::Failed));
        assert_eq!(patch.error_message.as_deref(), Some("ffprobe failed"));

        assert_eq!(
            restore_patch(JobKind::Translate, "x").status,
            Some(ProjectStatus::Ready)
        );
        assert_eq!(
            restore_patch(JobKind::Export, "x").status,
            Some(ProjectStatus::Translated)
        );
        assert!(restore_patch(JobKind::Export, "x").error_message.is_none());
    }

    #[test]
    fn test_dotted_extension() {
        assert_eq!(dotted_extension("Movie.MKV"), ".mkv");
        assert_eq!(dotted_extension("noext"), "");
        assert_eq!(dotted_extension("a.b.srt"), ".srt");
    }

    #[tokio::test]
    async fn test_job_workspace_removed_on_drop() {
        let fx = test_support::fixture().await;
        let path = {
            let dir = job_workspace(&fx.ctx, &JobId::new()).await.unwrap();
            assert!(dir.path().exists());
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}

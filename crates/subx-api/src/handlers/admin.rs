//! Operator endpoints: dashboard numbers, storage usage, cleanup and
//! job intervention across all users.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use subx_db::{JobPatch, JobRow, ProfileRow, ProjectPatch, StoredFileQuery};
use subx_models::{ExportConfig, JobId, JobKind, JobStatus, ProjectStatus, TranslateConfig};
use subx_queue::{ExportVideoJob, ExtractTracksJob, QueueJob, TranslateSubtitlesJob};
use subx_worker::cleanup::cleanup_expired_files;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::{cancel_row, status_after_cancel};
use crate::handlers::translate::resolve_api_key;
use crate::metrics;
use crate::state::AppState;

const TOP_STORAGE_USERS: usize = 20;

/// System-wide counters for the dashboard.
#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub total_users: u64,
    pub total_projects: u64,
    pub total_extract_jobs: u64,
    pub total_translation_jobs: u64,
    pub total_export_jobs: u64,
    pub active_jobs: u64,
    pub failed_jobs: u64,
    pub total_storage_bytes: i64,
    pub total_stored_files: u64,
    pub queue_length: u64,
    pub dlq_length: u64,
}

/// `GET /api/admin/stats`
pub async fn admin_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<AdminStatsResponse>> {
    user.require_admin()?;
    let store = &state.store;

    let files = store
        .list_stored_files(&StoredFileQuery::default().managed())
        .await?;

    Ok(Json(AdminStatsResponse {
        total_users: store.count_profiles().await?,
        total_projects: store.count_projects().await?,
        total_extract_jobs: store.count_jobs(Some(JobKind::Extract), &[]).await?,
        total_translation_jobs: store.count_jobs(Some(JobKind::Translate), &[]).await?,
        total_export_jobs: store.count_jobs(Some(JobKind::Export), &[]).await?,
        active_jobs: store
            .count_jobs(None, &[JobStatus::Queued, JobStatus::Processing])
            .await?,
        failed_jobs: store.count_jobs(None, &[JobStatus::Failed]).await?,
        total_storage_bytes: files.iter().map(|f| f.file_size_bytes.max(0)).sum(),
        total_stored_files: files.len() as u64,
        queue_length: state.queue.len().await.unwrap_or(0),
        dlq_length: state.queue.dlq_len().await.unwrap_or(0),
    }))
}

#[derive(Debug, Serialize)]
pub struct StorageUser {
    pub id: String,
    pub email: Option<String>,
    pub plan_id: String,
    pub storage_used_bytes: i64,
    pub daily_jobs_used: i64,
}

impl From<ProfileRow> for StorageUser {
    fn from(profile: ProfileRow) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            plan_id: profile.plan_id,
            storage_used_bytes: profile.storage_used_bytes,
            daily_jobs_used: profile.daily_jobs_used,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct TypeUsage {
    pub count: u64,
    pub bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct StorageStatsResponse {
    pub top_users: Vec<StorageUser>,
    pub file_type_breakdown: BTreeMap<&'static str, TypeUsage>,
    pub total_files: u64,
    pub total_bytes: i64,
}

/// `GET /api/admin/storage`
///
/// Only files we still host count; copies in users' own buckets are skipped.
pub async fn storage_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<StorageStatsResponse>> {
    user.require_admin()?;

    let top_users = state
        .store
        .list_profiles_by_storage(TOP_STORAGE_USERS)
        .await?
        .into_iter()
        .map(StorageUser::from)
        .collect();

    let files = state
        .store
        .list_stored_files(&StoredFileQuery::default().managed())
        .await?;
    let mut breakdown: BTreeMap<&'static str, TypeUsage> = BTreeMap::new();
    for file in &files {
        let usage = breakdown.entry(file.file_type.as_str()).or_default();
        usage.count += 1;
        usage.bytes += file.file_size_bytes.max(0);
    }

    Ok(Json(StorageStatsResponse {
        top_users,
        total_files: files.len() as u64,
        total_bytes: breakdown.values().map(|u| u.bytes).sum(),
        file_type_breakdown: breakdown,
    }))
}

/// `POST /api/admin/storage/cleanup`
pub async fn run_cleanup(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    user.require_admin()?;

    let deleted = cleanup_expired_files(state.store.as_ref(), state.objects.as_ref()).await?;
    info!(admin = %user.id, deleted, "Manual cleanup finished");

    Ok(Json(json!({
        "deleted_count": deleted,
        "message": format!("{} expired files deleted", deleted),
    })))
}

async fn any_job(state: &AppState, job_id: &str) -> ApiResult<JobRow> {
    state
        .store
        .get_job(&JobId::from_string(job_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// `POST /api/admin/jobs/:id/cancel`
pub async fn admin_cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    user.require_admin()?;
    let job = any_job(&state, &job_id).await?;
    cancel_row(&state, &job).await?;

    metrics::record_job_cancelled(job.kind.as_str());
    info!(admin = %user.id, job_id = %job.id, owner = %job.user_id, "Job cancelled by admin");

    Ok(Json(json!({ "job_id": job.id, "status": "cancelled" })))
}

/// Where an extract job's upload was left.
#[derive(Debug, Deserialize)]
struct ExtractSource {
    upload_key: String,
    file_name: String,
}

fn stored_config<T: DeserializeOwned>(job: &JobRow) -> ApiResult<T> {
    let config = job
        .config
        .clone()
        .ok_or_else(|| ApiError::bad_request("Job has no stored payload to retry"))?;
    serde_json::from_value(config)
        .map_err(|e| ApiError::bad_request(format!("Stored job payload is invalid: {}", e)))
}

/// Rebuild the stream payload of a failed job. Translation keys are
/// resolved again since the row never holds one.
async fn retry_payload(state: &AppState, job: &JobRow) -> ApiResult<QueueJob> {
    let (job_id, user_id, project_id) = (job.id.clone(), job.user_id.clone(), job.project_id.clone());
    let payload = match job.kind {
        JobKind::Extract => {
            let source: ExtractSource = stored_config(job)?;
            ExtractTracksJob::new(job_id, user_id, project_id, source.upload_key, source.file_name)
                .into()
        }
        JobKind::Translate => {
            let mut config: TranslateConfig = stored_config(job)?;
            let profile = state
                .store
                .get_profile(&job.user_id)
                .await?
                .unwrap_or_else(|| ProfileRow::new(job.user_id.clone(), None));
            let plan = state.store.plan_for_profile(&profile).await?;
            let user_keys = state
                .store
                .list_user_api_keys(&job.user_id, config.engine)
                .await?;
            let engine_row = state.store.get_engine(config.engine).await?;
            let resolved = resolve_api_key(
                &user_keys,
                &plan,
                engine_row.as_ref(),
                state.engine_keys.get(config.engine),
            )
            .ok_or_else(|| ApiError::bad_request("API key not found for retry"))?;
            config.model_id = config.model_id.or(resolved.model_id);
            config.api_key = Some(resolved.api_key);
            TranslateSubtitlesJob::new(job_id, user_id, project_id, config).into()
        }
        JobKind::Export => {
            let config: ExportConfig = stored_config(job)?;
            ExportVideoJob::new(job_id, user_id, project_id, config).into()
        }
    };
    Ok(payload)
}

/// Project status while a job of `kind` is in flight.
fn busy_status(kind: JobKind) -> ProjectStatus {
    match kind {
        JobKind::Extract => ProjectStatus::Processing,
        JobKind::Translate => ProjectStatus::Translating,
        JobKind::Export => ProjectStatus::Exporting,
    }
}

fn settled_patch(kind: JobKind, message: &str) -> ProjectPatch {
    match kind {
        JobKind::Extract => ProjectPatch::failed(message),
        other => ProjectPatch::status(status_after_cancel(other)),
    }
    .touch()
}

/// `POST /api/admin/jobs/:id/retry`
///
/// Moves a failed job back to queued and puts it on the stream again.
pub async fn retry_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    user.require_admin()?;
    let job = any_job(&state, &job_id).await?;
    if job.status != JobStatus::Failed {
        return Err(ApiError::not_found("Failed job not found"));
    }
    let payload = retry_payload(&state, &job).await?;

    if !state
        .store
        .transition_job(&job.id, &[JobStatus::Failed], &JobPatch::retried())
        .await?
    {
        return Err(ApiError::conflict("Job is no longer failed"));
    }
    // A fresh retry budget
    if let Err(e) = state.queue.clear_retry(job.id.as_str()).await {
        warn!(job_id = %job.id, "Could not reset retry counter: {}", e);
    }
    state
        .store
        .update_project(&job.project_id, &ProjectPatch::status(busy_status(job.kind)).touch())
        .await?;

    if let Err(e) = state.queue.enqueue(payload).await {
        let message = format!("Could not queue retry: {}", e);
        if let Err(db) = state
            .store
            .transition_job(&job.id, &[JobStatus::Queued], &JobPatch::failed(&message))
            .await
        {
            warn!(job_id = %job.id, "Could not mark job failed: {}", db);
        }
        if let Err(db) = state
            .store
            .update_project(&job.project_id, &settled_patch(job.kind, &message))
            .await
        {
            warn!(project_id = %job.project_id, "Could not restore project status: {}", db);
        }
        return Err(e.into());
    }

    metrics::record_job_enqueued(job.kind.as_str());
    info!(admin = %user.id, job_id = %job.id, kind = %job.kind, "Failed job re-queued");

    Ok(Json(json!({
        "job_id": job.id,
        "status": JobStatus::Queued,
        "message": "Job re-launched",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use subx_models::ProjectId;

    #[test]
    fn test_busy_and_settled_status_pair_up() {
        assert_eq!(busy_status(JobKind::Translate), ProjectStatus::Translating);
        assert_eq!(busy_status(JobKind::Export), ProjectStatus::Exporting);
        assert_eq!(
            settled_patch(JobKind::Translate, "x").status,
            Some(ProjectStatus::Ready)
        );
        let extract = settled_patch(JobKind::Extract, "queue down");
        assert_eq!(extract.status, Some(ProjectStatus::Failed));
        assert_eq!(extract.error_message.as_deref(), Some("queue down"));
    }

    #[test]
    fn test_stored_config_requires_payload() {
        let job = JobRow::new("u1", ProjectId::from_string("p1"), JobKind::Extract, None);
        assert!(matches!(
            stored_config::<ExtractSource>(&job),
            Err(ApiError::BadRequest(_))
        ));

        let job = JobRow::new(
            "u1",
            ProjectId::from_string("p1"),
            JobKind::Extract,
            Some(json!({"upload_key": "uploads/u1/a.mkv", "file_name": "a.mkv"})),
        );
        let source: ExtractSource = stored_config(&job).unwrap();
        assert_eq!(source.upload_key, "uploads/u1/a.mkv");
        assert_eq!(source.file_name, "a.mkv");
    }
}

//! Video export: submission, download, and cleanup of previous renders.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use subx_db::{JobPatch, JobRow, ProjectPatch, StoredFileQuery};
use subx_models::{ExportConfig, FileType, JobKind, JobStatus, Plan, ProjectStatus};
use subx_queue::ExportVideoJob;
use subx_worker::cleanup::{mark_uploaded_to_user_storage, recalculate_user_storage};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::owned_job;
use crate::handlers::owned_project;
use crate::metrics;
use crate::state::AppState;

/// Watermark stamped on exports of plans that require one.
pub const WATERMARK_TEXT: &str = "SubTranslate";

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub project_id: String,
    #[serde(flatten)]
    pub config: ExportConfig,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Apply plan rules to a requested export.
pub fn enforce_plan(mut config: ExportConfig, plan: &Plan) -> ApiResult<ExportConfig> {
    if !plan.allows_resolution(config.resolution) {
        return Err(ApiError::forbidden(format!(
            "Your plan allows exports up to {}",
            plan.max_export_resolution.as_str()
        )));
    }
    if plan.watermark_required {
        config.include_watermark = true;
        config.watermark_text = Some(WATERMARK_TEXT.to_string());
    }
    Ok(config)
}

/// `POST /api/export`
pub async fn start_export(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ExportRequest>,
) -> ApiResult<Json<ExportResponse>> {
    let project = owned_project(&state, &request.project_id, &user.id).await?;
    if project.status.is_busy() {
        return Err(ApiError::conflict(format!(
            "Project is {}; wait for the current job to finish",
            project.status
        )));
    }

    let plan = state.store.plan_for_profile(&user.profile).await?;
    let mut config = enforce_plan(request.config, &plan)?;
    if config.subtitle_style.is_none() {
        config.subtitle_style = project.subtitle_style.clone();
    }

    let has_translation = state
        .store
        .list_subtitle_files(&project.id)
        .await?
        .iter()
        .any(|f| f.translated_file_url.is_some());
    if !has_translation {
        return Err(ApiError::bad_request("Translate a subtitle track before exporting"));
    }

    let job_config =
        serde_json::to_value(&config).map_err(|e| ApiError::internal(e.to_string()))?;
    let job = state
        .store
        .insert_job(&JobRow::new(
            user.id.clone(),
            project.id.clone(),
            JobKind::Export,
            Some(job_config),
        ))
        .await?;

    let previous_status = project.status;
    state
        .store
        .update_project(&project.id, &ProjectPatch::status(ProjectStatus::Exporting).touch())
        .await?;

    let queued = ExportVideoJob::new(job.id.clone(), user.id.clone(), project.id.clone(), config);
    if let Err(e) = state.queue.enqueue(queued).await {
        let message = format!("Could not queue export: {}", e);
        if let Err(db) = state
            .store
            .transition_job(&job.id, &[JobStatus::Queued], &JobPatch::failed(&message))
            .await
        {
            warn!(job_id = %job.id, "Could not mark job failed: {}", db);
        }
        if let Err(db) = state
            .store
            .update_project(&project.id, &ProjectPatch::status(previous_status).touch())
            .await
        {
            warn!(project_id = %project.id, "Could not restore project status: {}", db);
        }
        return Err(e.into());
    }

    metrics::record_job_enqueued(JobKind::Export.as_str());
    info!(user_id = %user.id, project_id = %project.id, job_id = %job.id, "Export queued");

    Ok(Json(ExportResponse {
        job_id: job.id.to_string(),
        status: JobStatus::Queued,
    }))
}

/// `GET /api/export/:job_id/download`
pub async fn download_export(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = owned_job(&state, &job_id, &user.id).await?;
    if job.kind != JobKind::Export {
        return Err(ApiError::bad_request("Not an export job"));
    }
    if job.status != JobStatus::Completed {
        return Err(ApiError::bad_request(format!("Export is {}", job.status)));
    }
    let key = job
        .result
        .output_key
        .as_deref()
        .ok_or_else(|| ApiError::not_found("Export output not found"))?;

    let download_url = state
        .objects
        .presign_get(key, state.config.presign_expiry)
        .await?;

    Ok(Json(json!({
        "download_url": download_url,
        "expires_in": state.config.presign_expiry.as_secs(),
        "size_bytes": job.result.output_size_bytes,
    })))
}

/// `GET /api/export/active/:project_id`: newest unfinished export, or `null`.
pub async fn active_export(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Option<JobRow>>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    let active = state
        .store
        .list_jobs_for_project(&project.id)
        .await?
        .into_iter()
        .find(|j| j.kind == JobKind::Export && !j.status.is_terminal());
    Ok(Json(active))
}

/// `DELETE /api/export/previous/:project_id`
pub async fn delete_previous_exports(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    if project.status == ProjectStatus::Exporting {
        return Err(ApiError::conflict("An export is in progress"));
    }

    let files = state
        .store
        .list_stored_files(&StoredFileQuery::for_project(&project.id).file_type(FileType::ExportVideo))
        .await?;

    let keys: Vec<String> = files.iter().map(|f| f.storage_path.clone()).collect();
    if !keys.is_empty() {
        state.objects.delete_many(&keys).await?;
    }
    let ids: Vec<String> = files.into_iter().map(|f| f.id).collect();
    let deleted = if ids.is_empty() {
        0
    } else {
        state.store.delete_stored_files(&ids).await?
    };

    if project.status == ProjectStatus::Exported {
        state
            .store
            .update_project(&project.id, &ProjectPatch::status(ProjectStatus::Translated).touch())
            .await?;
    }
    recalculate_user_storage(state.store.as_ref(), &user.id).await?;

    info!(user_id = %user.id, project_id = %project.id, deleted, "Previous exports deleted");
    Ok(Json(json!({
        "deleted_files": deleted,
        "message": format!("Deleted {} export file(s)", deleted),
    })))
}

/// `POST /api/export/:project_id/uploaded-to-own-storage`
pub async fn mark_uploaded(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    let updated = mark_uploaded_to_user_storage(state.store.as_ref(), &user.id, &project.id).await?;
    Ok(Json(json!({ "updated_files": updated })))
}

//! Project lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

use subx_db::{JobPatch, JobRow, ProjectPatch, ProjectRow, StoredFileQuery, SubtitleFileRow};
use subx_models::{JobKind, JobStatus};
use subx_queue::ExtractTracksJob;
use subx_storage::keys::project_prefix;
use subx_worker::cleanup::{
    check_storage_limit, ensure_storage_for_upload, format_bytes, recalculate_user_storage,
};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::owned_project;
use crate::metrics;
use crate::security::{is_valid_object_key, sanitize_name};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub upload_key: String,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub project: ProjectRow,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `POST /api/projects`: register an upload and queue track extraction.
pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<CreateProjectResponse>)> {
    request.validate()?;

    let name = sanitize_name(&request.name);
    if name.is_empty() {
        return Err(ApiError::bad_request("Project name is required"));
    }
    if !request.upload_key.starts_with("uploads/") || !is_valid_object_key(&request.upload_key) {
        return Err(ApiError::bad_request("Invalid upload key"));
    }

    let plan = state.store.plan_for_profile(&user.profile).await?;
    if plan.daily_job_limit >= 0 {
        let used = state.store.daily_jobs_used(&user.id).await?;
        if used >= plan.daily_job_limit {
            return Err(ApiError::quota_exceeded(format!(
                "Daily job limit reached ({} per day)",
                plan.daily_job_limit
            )));
        }
    }

    let head = match state.objects.head(&request.upload_key).await {
        Ok(head) => head,
        Err(e) if e.is_not_found() => {
            return Err(ApiError::bad_request("Upload not found; upload the file first"))
        }
        Err(e) => return Err(e.into()),
    };

    let storage = ensure_storage_for_upload(
        state.store.as_ref(),
        state.objects.as_ref(),
        &user.id,
        head.size,
    )
    .await?;
    if !storage.ok {
        return Err(ApiError::insufficient_storage(format!(
            "Not enough storage: {} needed, {} available",
            format_bytes(head.size),
            format_bytes(storage.available)
        )));
    }

    let mut project = ProjectRow::new(user.id.clone(), name);
    project.file_name = Some(request.file_name.clone());
    project.file_size_bytes = Some(head.size as i64);
    project.source_lang = request.source_lang.filter(|l| !l.is_empty());
    project.target_lang = request.target_lang.filter(|l| !l.is_empty());
    let project = state.store.insert_project(&project).await?;

    let job = state
        .store
        .insert_job(&JobRow::new(
            user.id.clone(),
            project.id.clone(),
            JobKind::Extract,
            Some(json!({
                "upload_key": request.upload_key,
                "file_name": request.file_name,
            })),
        ))
        .await?;

    let queued = ExtractTracksJob::new(
        job.id.clone(),
        user.id.clone(),
        project.id.clone(),
        request.upload_key.clone(),
        request.file_name.clone(),
    );
    if let Err(e) = state.queue.enqueue(queued).await {
        let message = format!("Could not queue processing: {}", e);
        if let Err(db) = state
            .store
            .update_project(&project.id, &ProjectPatch::failed(&message))
            .await
        {
            warn!(project_id = %project.id, "Could not mark project failed: {}", db);
        }
        if let Err(db) = state
            .store
            .transition_job(&job.id, &[JobStatus::Queued], &JobPatch::failed(&message))
            .await
        {
            warn!(job_id = %job.id, "Could not mark job failed: {}", db);
        }
        return Err(e.into());
    }

    state.store.increment_daily_jobs(&user.id).await?;
    metrics::record_job_enqueued(JobKind::Extract.as_str());
    info!(user_id = %user.id, project_id = %project.id, job_id = %job.id, "Project created");

    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse {
            project,
            job_id: job.id.to_string(),
            warning: storage.warning,
        }),
    ))
}

/// `GET /api/projects`
pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<ProjectRow>>> {
    Ok(Json(state.store.list_projects(&user.id).await?))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectRow>> {
    Ok(Json(owned_project(&state, &project_id, &user.id).await?))
}

/// `DELETE /api/projects/:id`: objects first, then rows.
pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    let project = owned_project(&state, &project_id, &user.id).await?;

    let prefix = project_prefix(&user.id, project.id.as_str());
    let listing = state.objects.list(&prefix, None).await?;
    let mut keys: Vec<String> = listing.objects.into_iter().map(|o| o.key).collect();

    let stored = state
        .store
        .list_stored_files(&StoredFileQuery::for_project(&project.id))
        .await?;
    // Rows can point outside the prefix, e.g. files kept under uploads/
    for file in &stored {
        if !keys.contains(&file.storage_path) {
            keys.push(file.storage_path.clone());
        }
    }

    let deleted_objects = if keys.is_empty() {
        0
    } else {
        state.objects.delete_many(&keys).await?
    };

    let ids: Vec<String> = stored.into_iter().map(|f| f.id).collect();
    if !ids.is_empty() {
        state.store.delete_stored_files(&ids).await?;
    }
    state.store.delete_project(&project.id).await?;
    recalculate_user_storage(state.store.as_ref(), &user.id).await?;

    info!(
        user_id = %user.id,
        project_id = %project.id,
        objects = deleted_objects,
        "Project deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/projects/:id/tracks`
pub async fn list_tracks(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<SubtitleFileRow>>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    Ok(Json(state.store.list_subtitle_files(&project.id).await?))
}

/// `GET /api/projects/:id/jobs`
pub async fn list_project_jobs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<JobRow>>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    Ok(Json(state.store.list_jobs_for_project(&project.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportSrtQuery {
    pub subtitle_file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadLink {
    pub download_url: String,
    pub file_name: String,
    pub expires_in: u64,
}

/// Download name like `Movie.tr.srt`.
fn download_name(project: &ProjectRow, track: &SubtitleFileRow, key: &str) -> String {
    let stem = std::path::Path::new(&project.name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("subtitles");
    let ext = std::path::Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("srt");
    let lang = match (&track.translated_file_url, &project.target_lang) {
        (Some(_), Some(target)) => target.as_str(),
        _ => track.language.as_str(),
    };
    format!("{}.{}.{}", stem, lang, ext)
}

/// `GET /api/projects/:id/export-srt`: translated track if there is one, else the original.
pub async fn export_srt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Query(query): Query<ExportSrtQuery>,
) -> ApiResult<Json<DownloadLink>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    let tracks = state.store.list_subtitle_files(&project.id).await?;

    let track = match query.subtitle_file_id.as_deref() {
        Some(id) => tracks.iter().find(|t| t.id == id),
        None => tracks
            .iter()
            .find(|t| t.translated_file_url.is_some())
            .or_else(|| tracks.first()),
    }
    .ok_or_else(|| ApiError::not_found("No subtitle track"))?;

    let key = track
        .translated_file_url
        .as_deref()
        .unwrap_or(track.file_url.as_str());
    let download_url = state
        .objects
        .presign_get(key, state.config.presign_expiry)
        .await?;

    Ok(Json(DownloadLink {
        file_name: download_name(&project, track, key),
        download_url,
        expires_in: state.config.presign_expiry.as_secs(),
    }))
}

/// `GET /api/storage/info`
pub async fn storage_info(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let check = check_storage_limit(state.store.as_ref(), &user.id).await?;
    let percent = if check.max == 0 {
        100.0
    } else {
        (check.used as f64 / check.max as f64 * 1000.0).round() / 10.0
    };

    Ok(Json(json!({
        "ok": check.ok,
        "used": check.used,
        "max": check.max,
        "available": check.available,
        "used_formatted": format_bytes(check.used),
        "max_formatted": format_bytes(check.max),
        "available_formatted": format_bytes(check.available),
        "percent": percent,
    })))
}

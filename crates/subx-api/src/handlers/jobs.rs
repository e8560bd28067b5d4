//! Job status and cancellation.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use subx_db::{JobPatch, JobRow, ProjectPatch};
use subx_models::{JobId, JobKind, JobStatus, ProjectStatus};
use subx_queue::{export_key, extract_key, translate_key};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

pub(crate) async fn owned_job(state: &AppState, job_id: &str, user_id: &str) -> ApiResult<JobRow> {
    state
        .store
        .get_job_for_user(&JobId::from_string(job_id), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Project status once a job of `kind` is cancelled.
pub fn status_after_cancel(kind: JobKind) -> ProjectStatus {
    match kind {
        JobKind::Extract => ProjectStatus::Failed,
        JobKind::Translate => ProjectStatus::Ready,
        JobKind::Export => ProjectStatus::Translated,
    }
}

/// Idempotency key the job was enqueued under.
pub(crate) fn dedup_key(job: &JobRow) -> String {
    match job.kind {
        JobKind::Extract => extract_key(&job.project_id),
        JobKind::Translate => match job.translate_config() {
            Some(config) => translate_key(&job.project_id, &config.subtitle_file_id),
            None => translate_key(&job.project_id, ""),
        },
        JobKind::Export => export_key(&job.project_id),
    }
}

const CANCELLABLE: &[JobStatus] = &[JobStatus::Queued, JobStatus::Processing];

/// Cancel a queued or processing job, restore its project and tell
/// listeners. The worker notices between steps and stops.
pub(crate) async fn cancel_row(state: &AppState, job: &JobRow) -> ApiResult<()> {
    if !job.status.is_cancellable() {
        return Err(ApiError::bad_request(format!(
            "Job is {} and can no longer be cancelled",
            job.status
        )));
    }

    let cancelled = state
        .store
        .transition_job(&job.id, CANCELLABLE, &JobPatch::cancelled())
        .await?;
    if !cancelled {
        return Err(ApiError::bad_request("Job finished before it could be cancelled"));
    }

    let project_patch = if job.kind == JobKind::Extract {
        ProjectPatch::failed("Processing cancelled")
    } else {
        ProjectPatch::status(status_after_cancel(job.kind))
    };
    state
        .store
        .update_project(&job.project_id, &project_patch.touch())
        .await?;

    // Both are best effort; the row is the source of truth
    if let Err(e) = state.queue.clear_dedup_key(&dedup_key(job)).await {
        warn!(job_id = %job.id, "Could not clear dedup key: {}", e);
    }
    if let Some(progress) = &state.progress {
        if let Err(e) = progress.cancelled(&job.id, job.kind).await {
            warn!(job_id = %job.id, "Could not publish cancellation: {}", e);
        }
    }

    Ok(())
}

/// `GET /api/jobs/:id`
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRow>> {
    Ok(Json(owned_job(&state, &job_id, &user.id).await?))
}

/// `POST /api/jobs/:id/cancel`
///
/// Marks the row cancelled; the worker notices between steps and stops.
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = owned_job(&state, &job_id, &user.id).await?;
    cancel_row(&state, &job).await?;

    metrics::record_job_cancelled(job.kind.as_str());
    info!(user_id = %user.id, job_id = %job.id, kind = %job.kind, "Job cancelled");

    Ok(Json(json!({ "job_id": job.id, "status": "cancelled" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use subx_models::ProjectId;

    #[test]
    fn test_status_after_cancel() {
        assert_eq!(status_after_cancel(JobKind::Translate), ProjectStatus::Ready);
        assert_eq!(status_after_cancel(JobKind::Export), ProjectStatus::Translated);
        assert_eq!(status_after_cancel(JobKind::Extract), ProjectStatus::Failed);
    }

    #[test]
    fn test_dedup_key_matches_enqueue() {
        let pid = ProjectId::from_string("p1");
        let job = JobRow::new(
            "u1",
            pid.clone(),
            JobKind::Translate,
            Some(json!({"subtitle_file_id": "sf1", "source_lang": "en", "target_lang": "tr"})),
        );
        assert_eq!(dedup_key(&job), translate_key(&pid, "sf1"));

        let job = JobRow::new("u1", pid.clone(), JobKind::Export, None);
        assert_eq!(dedup_key(&job), export_key(&pid));
    }
}

//! Request handlers.

pub mod admin;
pub mod export;
pub mod files;
pub mod glossary;
pub mod health;
pub mod jobs;
pub mod projects;
pub mod storage;
pub mod subtitles;
pub mod translate;
pub mod uploads;

use subx_db::{ProjectRow, SubtitleFileRow};
use subx_models::ProjectId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Load a project owned by `user_id`; anything else is a 404.
pub(crate) async fn owned_project(
    state: &AppState,
    project_id: &str,
    user_id: &str,
) -> ApiResult<ProjectRow> {
    state
        .store
        .get_project_for_user(&ProjectId::from_string(project_id), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
}

/// Load a subtitle file and check it belongs to `project`.
pub(crate) async fn project_track(
    state: &AppState,
    project: &ProjectRow,
    subtitle_file_id: &str,
) -> ApiResult<SubtitleFileRow> {
    state
        .store
        .get_subtitle_file(subtitle_file_id)
        .await?
        .filter(|file| file.project_id == project.id)
        .ok_or_else(|| ApiError::not_found("Subtitle file not found"))
}

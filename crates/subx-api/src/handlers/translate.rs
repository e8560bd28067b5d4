//! Translation job submission.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use subx_db::{EngineRow, JobPatch, JobRow, ProjectPatch, UserApiKeyRow};
use subx_models::{EngineKind, JobKind, JobStatus, Plan, ProjectStatus, TranslateConfig};
use subx_queue::TranslateSubtitlesJob;
use subx_subtitles::parse_bytes;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{owned_project, project_track};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub project_id: String,
    pub subtitle_file_id: Option<String>,
    #[serde(default)]
    pub engine: EngineKind,
    pub model_id: Option<String>,
    /// Defaults to the track's language.
    pub source_lang: Option<String>,
    /// Defaults to the project's target language.
    pub target_lang: Option<String>,
    #[serde(default = "default_true")]
    pub context_enabled: bool,
    #[serde(default)]
    pub glossary_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total_lines: usize,
}

/// Key and model chosen for a translation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey {
    pub api_key: String,
    pub model_id: Option<String>,
    pub system: bool,
}

/// Pick the API key: the user's default, any user key, then system keys
/// when the plan allows them (engine row first, environment second).
pub fn resolve_api_key(
    user_keys: &[UserApiKeyRow],
    plan: &Plan,
    engine_row: Option<&EngineRow>,
    env_key: Option<&str>,
) -> Option<ResolvedKey> {
    let user_key = user_keys
        .iter()
        .find(|k| k.is_default && !k.api_key_encrypted.is_empty())
        .or_else(|| user_keys.iter().find(|k| !k.api_key_encrypted.is_empty()));
    if let Some(key) = user_key {
        return Some(ResolvedKey {
            api_key: key.api_key_encrypted.clone(),
            model_id: key.model_id.clone(),
            system: false,
        });
    }

    if !plan.can_use_system_keys {
        return None;
    }

    engine_row
        .and_then(|row| row.system_key().map(|k| (k, row.model.clone())))
        .or_else(|| env_key.filter(|k| !k.is_empty()).map(|k| (k, None)))
        .map(|(key, model_id)| ResolvedKey {
            api_key: key.to_string(),
            model_id,
            system: true,
        })
}

/// `POST /api/translate`
pub async fn start_translation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<TranslateRequest>,
) -> ApiResult<Json<TranslateResponse>> {
    let project = owned_project(&state, &request.project_id, &user.id).await?;
    if project.status.is_busy() {
        return Err(ApiError::conflict(format!(
            "Project is {}; wait for the current job to finish",
            project.status
        )));
    }

    let subtitle_file_id = request
        .subtitle_file_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("subtitle_file_id is required"))?;
    let track = project_track(&state, &project, subtitle_file_id).await?;

    let target_lang = request
        .target_lang
        .clone()
        .or_else(|| project.target_lang.clone())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::bad_request("target_lang is required"))?;
    let source_lang = request
        .source_lang
        .clone()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| track.language.clone());

    let bytes = state.objects.download_bytes(&track.file_url).await?;
    let total_lines = parse_bytes(&bytes, track.format).len();
    if total_lines == 0 {
        return Err(ApiError::bad_request("Subtitle track has no lines"));
    }

    let plan = state.store.plan_for_profile(&user.profile).await?;
    if !plan.allows_lines(user.profile.lines_used_this_month, total_lines as i64) {
        return Err(ApiError::quota_exceeded(format!(
            "Monthly line limit reached: {} of {} used, {} requested",
            user.profile.lines_used_this_month, plan.lines_per_month, total_lines
        )));
    }

    let engine_row = state.store.get_engine(request.engine).await?;
    if engine_row.as_ref().is_some_and(|row| !row.is_enabled) {
        return Err(ApiError::bad_request(format!(
            "Engine {} is currently disabled",
            request.engine
        )));
    }
    let user_keys = state
        .store
        .list_user_api_keys(&user.id, request.engine)
        .await?;
    let resolved = resolve_api_key(
        &user_keys,
        &plan,
        engine_row.as_ref(),
        state.engine_keys.get(request.engine),
    )
    .ok_or_else(|| {
        ApiError::forbidden(format!(
            "No API key for {}. Add your own key in settings",
            request.engine
        ))
    })?;

    let config = TranslateConfig {
        subtitle_file_id: track.id.clone(),
        engine: request.engine,
        model_id: request.model_id.clone().or(resolved.model_id),
        source_lang: source_lang.clone(),
        target_lang: target_lang.clone(),
        context_enabled: request.context_enabled,
        glossary_enabled: request.glossary_enabled,
        api_key: Some(resolved.api_key),
    };

    // The row never holds the key
    let job_config = serde_json::to_value(config.redacted())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let job = state
        .store
        .insert_job(&JobRow::new(
            user.id.clone(),
            project.id.clone(),
            JobKind::Translate,
            Some(job_config),
        ))
        .await?;

    let previous_status = project.status;
    state
        .store
        .update_project(
            &project.id,
            &ProjectPatch {
                status: Some(ProjectStatus::Translating),
                source_lang: Some(source_lang),
                target_lang: Some(target_lang),
                ..Default::default()
            }
            .touch(),
        )
        .await?;

    let queued = TranslateSubtitlesJob::new(job.id.clone(), user.id.clone(), project.id.clone(), config);
    if let Err(e) = state.queue.enqueue(queued).await {
        let message = format!("Could not queue translation: {}", e);
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

    metrics::record_job_enqueued(JobKind::Translate.as_str());
    info!(
        user_id = %user.id,
        project_id = %project.id,
        job_id = %job.id,
        engine = %request.engine,
        system_key = resolved.system,
        total_lines,
        "Translation queued"
    );

    Ok(Json(TranslateResponse {
        job_id: job.id.to_string(),
        status: JobStatus::Queued,
        total_lines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_key(key: &str, default: bool, model: Option<&str>) -> UserApiKeyRow {
        UserApiKeyRow {
            id: format!("k-{}", key),
            user_id: "u1".into(),
            engine: EngineKind::OpenAi,
            api_key_encrypted: key.into(),
            model_id: model.map(String::from),
            is_default: default,
        }
    }

    fn engine(key: Option<&str>) -> EngineRow {
        EngineRow {
            id: EngineKind::OpenAi,
            name: "OpenAI".into(),
            model: Some("gpt-4o-mini".into()),
            api_key_encrypted: key.map(String::from),
            cost_per_line: 0.0001,
            is_enabled: true,
            sort_order: 0,
        }
    }

    fn plan(system: bool) -> Plan {
        Plan {
            can_use_system_keys: system,
            ..Plan::free()
        }
    }

    #[test]
    fn test_default_user_key_wins() {
        let keys = vec![
            user_key("sk-other", false, None),
            user_key("sk-default", true, Some("gpt-4o")),
        ];
        let resolved = resolve_api_key(&keys, &plan(true), Some(&engine(Some("sys"))), Some("env"))
            .unwrap();
        assert_eq!(resolved.api_key, "sk-default");
        assert_eq!(resolved.model_id.as_deref(), Some("gpt-4o"));
        assert!(!resolved.system);
    }

    #[test]
    fn test_any_user_key_before_system() {
        let keys = vec![user_key("sk-other", false, None)];
        let resolved = resolve_api_key(&keys, &plan(true), Some(&engine(Some("sys"))), None).unwrap();
        assert_eq!(resolved.api_key, "sk-other");
    }

    #[test]
    fn test_system_keys_need_plan() {
        assert!(resolve_api_key(&[], &plan(false), Some(&engine(Some("sys"))), Some("env")).is_none());

        let resolved = resolve_api_key(&[], &plan(true), Some(&engine(Some("sys"))), Some("env")).unwrap();
        assert_eq!(resolved.api_key, "sys");
        assert_eq!(resolved.model_id.as_deref(), Some("gpt-4o-mini"));
        assert!(resolved.system);

        let resolved = resolve_api_key(&[], &plan(true), Some(&engine(None)), Some("env")).unwrap();
        assert_eq!(resolved.api_key, "env");

        assert!(resolve_api_key(&[], &plan(true), None, None).is_none());
    }
}

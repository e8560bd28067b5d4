//! Subtitle editor: merged lines, batch edits and styling.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use subx_db::{ProjectPatch, ProjectRow, StoredFileRow, SubtitleFilePatch, SubtitleFileRow};
use subx_models::{FileType, ProjectStatus, SubtitleFormat, SubtitleStyle};
use subx_storage::keys::{content_type_for, translated_subtitle_key};
use subx_subtitles::{parse_bytes, write_subtitles, SubtitleLine};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{owned_project, project_track};
use crate::state::AppState;

/// One row of the editor: original cue with its translation, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditorLine {
    /// `{subtitle_file_id}_{line_number}`
    pub id: String,
    pub subtitle_file_id: String,
    pub line_number: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub original_text: String,
    pub translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub is_translated: bool,
}

pub fn line_id(subtitle_file_id: &str, line_number: u32) -> String {
    format!("{}_{}", subtitle_file_id, line_number)
}

/// Split `{file}_{n}`; file ids never contain `_`, but split from the right anyway.
pub fn parse_line_id(id: &str) -> Option<(&str, u32)> {
    let (file, number) = id.rsplit_once('_')?;
    if file.is_empty() {
        return None;
    }
    Some((file, number.parse().ok()?))
}

/// Pair original cues with translated text by line number.
pub fn merge_lines(
    subtitle_file_id: &str,
    originals: &[SubtitleLine],
    translated: &[SubtitleLine],
) -> Vec<EditorLine> {
    let by_number: HashMap<u32, &str> = translated
        .iter()
        .map(|l| (l.line_number, l.text.as_str()))
        .collect();

    originals
        .iter()
        .map(|line| {
            let translated_text = by_number.get(&line.line_number).map(|t| t.to_string());
            EditorLine {
                id: line_id(subtitle_file_id, line.line_number),
                subtitle_file_id: subtitle_file_id.to_string(),
                line_number: line.line_number,
                start_ms: line.start_ms,
                end_ms: line.end_ms,
                original_text: line.text.clone(),
                is_translated: translated_text.is_some(),
                translated_text,
                style: line.style.clone(),
            }
        })
        .collect()
}

async fn load_lines(state: &AppState, key: &str, format: SubtitleFormat) -> ApiResult<Vec<SubtitleLine>> {
    let bytes = state.objects.download_bytes(key).await?;
    Ok(parse_bytes(&bytes, format))
}

fn format_of_key(key: &str, fallback: SubtitleFormat) -> SubtitleFormat {
    SubtitleFormat::from_path(std::path::Path::new(key)).unwrap_or(fallback)
}

/// Original and translated cues of a track.
async fn track_lines(
    state: &AppState,
    track: &SubtitleFileRow,
) -> ApiResult<(Vec<SubtitleLine>, Vec<SubtitleLine>)> {
    let originals = load_lines(state, &track.file_url, track.format).await?;
    let translated = match track.translated_file_url.as_deref() {
        Some(key) => {
            let format = format_of_key(key, track.format.translated_output());
            load_lines(state, key, format).await?
        }
        None => Vec::new(),
    };
    Ok((originals, translated))
}

#[derive(Debug, Deserialize)]
pub struct SubtitlesQuery {
    pub subtitle_file_id: Option<String>,
}

/// `GET /api/projects/:id/subtitles`
pub async fn get_subtitles(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Query(query): Query<SubtitlesQuery>,
) -> ApiResult<Json<Value>> {
    let project = owned_project(&state, &project_id, &user.id).await?;

    let track = match query.subtitle_file_id.as_deref() {
        Some(id) => project_track(&state, &project, id).await?,
        None => state
            .store
            .list_subtitle_files(&project.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found("Project has no subtitle tracks"))?,
    };

    let (originals, translated) = track_lines(&state, &track).await?;
    let lines = merge_lines(&track.id, &originals, &translated);
    let translated_count = lines.iter().filter(|l| l.is_translated).count();

    Ok(Json(json!({
        "subtitle_file_id": track.id,
        "format": track.format,
        "language": track.language,
        "total_lines": lines.len(),
        "translated_lines": translated_count,
        "lines": lines,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BatchEditRequest {
    /// `{file}_{n}` to new translated text.
    pub edits: HashMap<String, String>,
}

/// Rebuild the translated track: original timing, existing translations, then edits.
pub fn apply_edits(
    originals: &[SubtitleLine],
    translated: &[SubtitleLine],
    edits: &HashMap<u32, String>,
) -> (Vec<SubtitleLine>, usize) {
    let existing: HashMap<u32, &str> = translated
        .iter()
        .map(|l| (l.line_number, l.text.as_str()))
        .collect();

    let mut applied = 0;
    let lines = originals
        .iter()
        .map(|line| {
            let text = match edits.get(&line.line_number) {
                Some(edit) => {
                    applied += 1;
                    edit.as_str()
                }
                None => existing
                    .get(&line.line_number)
                    .copied()
                    .unwrap_or(line.text.as_str()),
            };
            line.with_text(text)
        })
        .collect();
    (lines, applied)
}

/// `PATCH /api/projects/:id/subtitles/batch`
pub async fn batch_update_subtitles(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(request): Json<BatchEditRequest>,
) -> ApiResult<Json<Value>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    if project.status.is_busy() {
        return Err(ApiError::conflict(format!(
            "Project is {}; wait for the job to finish",
            project.status
        )));
    }

    // BTreeMap keeps the file order stable across requests
    let mut by_file: BTreeMap<String, HashMap<u32, String>> = BTreeMap::new();
    for (id, text) in request.edits {
        let (file, number) =
            parse_line_id(&id).ok_or_else(|| ApiError::bad_request(format!("Invalid line id: {}", id)))?;
        by_file.entry(file.to_string()).or_default().insert(number, text);
    }

    let mut updated = 0;
    for (file_id, edits) in &by_file {
        let track = project_track(&state, &project, file_id).await?;
        updated += save_track_edits(&state, &user, &project, &track, edits).await?;
    }

    if updated > 0 && project.status != ProjectStatus::Editing {
        state
            .store
            .update_project(&project.id, &ProjectPatch::status(ProjectStatus::Editing).touch())
            .await?;
    }

    info!(user_id = %user.id, project_id = %project.id, updated, "Subtitle edits saved");
    Ok(Json(json!({ "updated": updated })))
}

async fn save_track_edits(
    state: &AppState,
    user: &AuthUser,
    project: &ProjectRow,
    track: &SubtitleFileRow,
    edits: &HashMap<u32, String>,
) -> ApiResult<usize> {
    let (originals, translated) = track_lines(state, track).await?;
    let (lines, applied) = apply_edits(&originals, &translated, edits);
    if applied == 0 {
        return Ok(0);
    }

    let format = match track.translated_file_url.as_deref() {
        Some(key) => format_of_key(key, track.format.translated_output()),
        None => track.format.translated_output(),
    };
    let content = write_subtitles(&lines, format, project.subtitle_style.as_ref());

    let key = match track.translated_file_url.clone() {
        Some(key) => key,
        None => translated_subtitle_key(&user.id, project.id.as_str(), &track.id, format),
    };
    let size = state
        .objects
        .upload_bytes(&key, content.into_bytes(), content_type_for(&key))
        .await?;

    if track.translated_file_url.is_none() {
        state
            .store
            .update_subtitle_file(&track.id, &SubtitleFilePatch::translated(&key))
            .await?;
        let plan = state.store.plan_for_profile(&user.profile).await?;
        let row = StoredFileRow::new(
            user.id.clone(),
            Some(project.id.clone()),
            FileType::TranslatedSubtitle,
            key.clone(),
            size as i64,
        )
        .with_retention_days(plan.retention_days)
        .with_cdn_url(state.objects.cdn_url(&key));
        state.store.insert_stored_file(&row).await?;
    }

    Ok(applied)
}

/// `PUT /api/projects/:id/style`
pub async fn update_style(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(style): Json<SubtitleStyle>,
) -> ApiResult<Json<Value>> {
    let project = owned_project(&state, &project_id, &user.id).await?;
    if project.status.is_busy() {
        return Err(ApiError::conflict(format!(
            "Project is {}; wait for the job to finish",
            project.status
        )));
    }

    let patch = ProjectPatch {
        subtitle_style: Some(style.clone()),
        status: Some(ProjectStatus::Editing),
        ..Default::default()
    }
    .touch();
    state.store.update_project(&project.id, &patch).await?;

    Ok(Json(json!({
        "status": ProjectStatus::Editing,
        "subtitle_style": style,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues(texts: &[&str]) -> Vec<SubtitleLine> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SubtitleLine::new(i as u32 + 1, i as u64 * 1000, i as u64 * 1000 + 900, *t))
            .collect()
    }

    #[test]
    fn test_parse_line_id() {
        assert_eq!(
            parse_line_id("550e8400-e29b-41d4-a716-446655440000_12"),
            Some(("550e8400-e29b-41d4-a716-446655440000", 12))
        );
        assert_eq!(parse_line_id("a_b_3"), Some(("a_b", 3)));
        assert_eq!(parse_line_id("nounderscore"), None);
        assert_eq!(parse_line_id("_3"), None);
        assert_eq!(parse_line_id("file_x"), None);
    }

    #[test]
    fn test_merge_lines_marks_translated() {
        let originals = cues(&["Hello", "World", "Bye"]);
        let translated = cues(&["Merhaba", "Dünya"]);
        let merged = merge_lines("sf", &originals, &translated);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "sf_1");
        assert_eq!(merged[1].translated_text.as_deref(), Some("Dünya"));
        assert!(!merged[2].is_translated);
        assert_eq!(merged[2].translated_text, None);
    }

    #[test]
    fn test_apply_edits_keeps_timing_and_existing() {
        let originals = cues(&["Hello", "World", "Bye"]);
        let translated = cues(&["Merhaba", "Dünya"]);
        let edits = HashMap::from([(2, "Evren".to_string()), (9, "ignored".to_string())]);

        let (lines, applied) = apply_edits(&originals, &translated, &edits);
        assert_eq!(applied, 1);
        assert_eq!(lines[0].text, "Merhaba");
        assert_eq!(lines[1].text, "Evren");
        assert_eq!(lines[1].start_ms, 1000);
        // Untranslated lines fall back to the original
        assert_eq!(lines[2].text, "Bye");
    }
}

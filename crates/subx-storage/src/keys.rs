//! Object key layout.
//!
//! ```text
//! users/{user_id}/{project_id}/source/{file}
//! users/{user_id}/{project_id}/subtitle/{file}
//! users/{user_id}/{project_id}/export/{file}
//! uploads/{uuid}/{file}
//! ```

use subx_models::{FileType, SubtitleFormat};
use uuid::Uuid;

/// Longest filename kept in a key.
const MAX_FILENAME_LEN: usize = 200;

/// Key for a project file.
pub fn project_key(user_id: &str, project_id: &str, file_type: FileType, file_name: &str) -> String {
    format!(
        "users/{}/{}/{}/{}",
        user_id,
        project_id,
        file_type.key_segment(),
        sanitize_filename(file_name)
    )
}

/// Prefix holding every object of a project.
pub fn project_prefix(user_id: &str, project_id: &str) -> String {
    format!("users/{}/{}/", user_id, project_id)
}

/// Fresh key for a presigned direct upload.
pub fn upload_key(file_name: &str) -> String {
    format!("uploads/{}/{}", Uuid::new_v4(), sanitize_filename(file_name))
}

/// Key of the translated copy of a subtitle file.
pub fn translated_subtitle_key(
    user_id: &str,
    project_id: &str,
    subtitle_file_id: &str,
    format: SubtitleFormat,
) -> String {
    project_key(
        user_id,
        project_id,
        FileType::TranslatedSubtitle,
        &format!("translated_{}.{}", subtitle_file_id, format.as_str()),
    )
}

/// Keep a filename safe for use as a single key segment.
///
/// Path separators and control characters become `_`, leading dots are
/// dropped so nothing hides or climbs, and the result is length-capped with
/// the extension preserved.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        return "file".to_string();
    }

    if cleaned.chars().count() <= MAX_FILENAME_LEN {
        return cleaned;
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < 16 => {
            let keep = MAX_FILENAME_LEN - ext.chars().count() - 1;
            format!("{}.{}", stem.chars().take(keep).collect::<String>(), ext)
        }
        _ => cleaned.chars().take(MAX_FILENAME_LEN).collect(),
    }
}

/// Content type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let name = key.rsplit('/').next().unwrap_or(key);
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "ass" | "ssa" => "text/x-ssa",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

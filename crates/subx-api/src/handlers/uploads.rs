//! Presigned direct uploads.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use subx_storage::keys::upload_key;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Containers and subtitle formats accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "webm", "mov", "ts", "flv", "srt", "ass", "ssa", "vtt",
];

#[derive(Debug, Deserialize, Validate)]
pub struct PresignRequest {
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[validate(range(min = 1))]
    pub size_bytes: u64,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub upload_url: String,
    pub key: String,
    pub expires_in: u64,
}

/// Lowercased extension if it is one we accept.
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = std::path::Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// `POST /api/uploads/presign`
pub async fn presign_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<PresignRequest>,
) -> ApiResult<Json<PresignResponse>> {
    request.validate()?;

    if allowed_extension(&request.file_name).is_none() {
        return Err(ApiError::bad_request(format!(
            "Unsupported file type. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    if request.size_bytes > state.config.max_upload_bytes {
        return Err(ApiError::bad_request(format!(
            "File too large: {} exceeds the {} upload limit",
            subx_worker::cleanup::format_bytes(request.size_bytes),
            subx_worker::cleanup::format_bytes(state.config.max_upload_bytes),
        )));
    }

    // Older files can be freed when the project is created, so only a file
    // larger than the whole plan is refused here.
    let plan = state.store.plan_for_profile(&user.profile).await?;
    if request.size_bytes > plan.storage_limit_bytes() {
        return Err(ApiError::insufficient_storage(format!(
            "File is larger than your plan's {} storage",
            subx_worker::cleanup::format_bytes(plan.storage_limit_bytes())
        )));
    }

    let key = upload_key(&request.file_name);
    let upload_url = state
        .objects
        .presign_put(&key, &request.content_type, state.config.presign_expiry)
        .await?;

    info!(user_id = %user.id, key = %key, size = request.size_bytes, "Presigned upload");

    Ok(Json(PresignResponse {
        upload_url,
        key,
        expires_in: state.config.presign_expiry.as_secs(),
    }))
}

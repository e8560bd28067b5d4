//! The user's own R2/B2 bucket: connection tests and file management.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use subx_db::UserStorageConfigRow;
use subx_storage::{ConnectionTest, ObjectHead, ObjectListing, UserBucket, UserBucketConfig};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::security::{is_valid_object_key, validate_endpoint_url};
use crate::state::AppState;

/// Marker the settings page shows in place of stored secrets.
const MASK: &str = "••";

const MIN_URL_EXPIRY: u64 = 60;
const MAX_URL_EXPIRY: u64 = 86_400;

fn bucket_config(row: &UserStorageConfigRow) -> UserBucketConfig {
    UserBucketConfig {
        provider: row.provider,
        r2_account_id: row.r2_account_id.clone(),
        r2_access_key: row.r2_access_key.clone(),
        r2_secret_key: row.r2_secret_key.clone(),
        r2_bucket_name: row.r2_bucket_name.clone(),
        r2_endpoint: row.r2_endpoint.clone(),
        b2_key_id: row.b2_key_id.clone(),
        b2_app_key: row.b2_app_key.clone(),
        b2_bucket_name: row.b2_bucket_name.clone(),
        b2_endpoint: row.b2_endpoint.clone(),
    }
}

/// Replace masked fields with the saved values.
pub fn unmask(mut config: UserBucketConfig, saved: Option<&UserBucketConfig>) -> UserBucketConfig {
    fn fill(value: &mut Option<String>, saved: Option<&Option<String>>) {
        if value.as_deref().is_some_and(|v| v.contains(MASK)) {
            *value = saved.and_then(|s| s.clone());
        }
    }
    fill(&mut config.r2_access_key, saved.map(|s| &s.r2_access_key));
    fill(&mut config.r2_secret_key, saved.map(|s| &s.r2_secret_key));
    fill(&mut config.b2_key_id, saved.map(|s| &s.b2_key_id));
    fill(&mut config.b2_app_key, saved.map(|s| &s.b2_app_key));
    config
}

/// SSRF-check every endpoint the config can reach.
pub fn check_endpoints(config: &UserBucketConfig) -> ApiResult<()> {
    for endpoint in [&config.r2_endpoint, &config.b2_endpoint]
        .into_iter()
        .flatten()
        .filter(|e| !e.trim().is_empty())
    {
        validate_endpoint_url(endpoint).map_err(ApiError::bad_request)?;
    }
    let resolved = config
        .to_storage_config()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    validate_endpoint_url(&resolved.endpoint_url).map_err(ApiError::bad_request)?;
    Ok(())
}

async fn saved_config(state: &AppState, user_id: &str) -> ApiResult<Option<UserBucketConfig>> {
    Ok(state
        .store
        .get_user_storage_config(user_id)
        .await?
        .filter(|row| row.is_active)
        .map(|row| bucket_config(&row)))
}

async fn user_bucket(state: &AppState, user_id: &str) -> ApiResult<UserBucket> {
    let config = saved_config(state, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No storage configuration saved"))?;
    check_endpoints(&config)?;
    UserBucket::new(&config).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn checked_key(key: &str) -> ApiResult<&str> {
    if is_valid_object_key(key) {
        Ok(key)
    } else {
        Err(ApiError::bad_request("Invalid object key"))
    }
}

/// `POST /api/storage-config/test`
pub async fn test_saved(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ConnectionTest>> {
    let bucket = user_bucket(&state, &user.id).await?;
    let result = bucket.test_connection().await;
    info!(user_id = %user.id, ok = result.ok, "Tested saved storage");
    Ok(Json(result))
}

/// `POST /api/storage-config/test-custom`
pub async fn test_custom(
    State(state): State<AppState>,
    user: AuthUser,
    Json(config): Json<UserBucketConfig>,
) -> ApiResult<Json<ConnectionTest>> {
    let saved = saved_config(&state, &user.id).await?;
    let config = unmask(config, saved.as_ref());
    check_endpoints(&config)?;

    let bucket = match UserBucket::new(&config) {
        Ok(bucket) => bucket,
        Err(e) => {
            return Ok(Json(ConnectionTest {
                ok: false,
                message: e.to_string(),
            }))
        }
    };
    let result = bucket.test_connection().await;
    if !result.ok {
        warn!(user_id = %user.id, message = %result.message, "Storage test failed");
    }
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
}

/// `GET /api/storage-config/files`
pub async fn list_files(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ObjectListing>> {
    if saved_config(&state, &user.id).await?.is_none() {
        return Ok(Json(ObjectListing::default()));
    }
    let bucket = user_bucket(&state, &user.id).await?;
    Ok(Json(bucket.list(&query.prefix).await?))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
    pub expires_in: Option<u64>,
}

/// `GET /api/storage-config/files/info`
pub async fn file_info(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<ObjectHead>> {
    let key = checked_key(&query.key)?;
    let bucket = user_bucket(&state, &user.id).await?;
    Ok(Json(bucket.file_info(key).await?))
}

/// `GET /api/storage-config/files/url`
pub async fn file_url(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<Value>> {
    let key = checked_key(&query.key)?;
    let expires_in = query
        .expires_in
        .unwrap_or(state.config.presign_expiry.as_secs())
        .clamp(MIN_URL_EXPIRY, MAX_URL_EXPIRY);

    let bucket = user_bucket(&state, &user.id).await?;
    let url = bucket
        .presigned_url(key, Duration::from_secs(expires_in))
        .await?;
    Ok(Json(json!({ "url": url, "expires_in": expires_in })))
}

/// `DELETE /api/storage-config/files`
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<KeyQuery>,
) -> ApiResult<StatusCode> {
    let key = checked_key(&query.key)?;
    let bucket = user_bucket(&state, &user.id).await?;
    bucket.delete(key).await?;
    info!(user_id = %user.id, key = %key, "Deleted file from user storage");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub old_key: String,
    pub new_key: String,
}

/// `POST /api/storage-config/files/rename`
pub async fn rename_file(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Value>> {
    let old_key = checked_key(request.old_key.trim())?;
    let new_key = checked_key(request.new_key.trim())?;
    if old_key == new_key {
        return Err(ApiError::bad_request("New key must differ from the old key"));
    }

    let bucket = user_bucket(&state, &user.id).await?;
    bucket.rename(old_key, new_key).await?;
    info!(user_id = %user.id, old_key = %old_key, new_key = %new_key, "Renamed file in user storage");
    Ok(Json(json!({ "old_key": old_key, "new_key": new_key })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use subx_models::StorageProvider;

    fn r2(endpoint: Option<&str>) -> UserBucketConfig {
        UserBucketConfig {
            provider: StorageProvider::R2,
            r2_account_id: Some("abc123".into()),
            r2_access_key: Some("key".into()),
            r2_secret_key: Some("secret".into()),
            r2_bucket_name: Some("mine".into()),
            r2_endpoint: endpoint.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_unmask_uses_saved_secrets() {
        let saved = r2(None);
        let incoming = UserBucketConfig {
            r2_secret_key: Some("••••••".into()),
            r2_access_key: Some("new-key".into()),
            ..r2(None)
        };
        let config = unmask(incoming, Some(&saved));
        assert_eq!(config.r2_secret_key.as_deref(), Some("secret"));
        assert_eq!(config.r2_access_key.as_deref(), Some("new-key"));

        let config = unmask(
            UserBucketConfig {
                r2_secret_key: Some("••".into()),
                ..r2(None)
            },
            None,
        );
        assert_eq!(config.r2_secret_key, None);
    }

    #[test]
    fn test_check_endpoints() {
        assert!(check_endpoints(&r2(None)).is_ok());
        assert!(check_endpoints(&r2(Some("https://abc123.r2.cloudflarestorage.com"))).is_ok());
        assert!(check_endpoints(&r2(Some("https://169.254.169.254"))).is_err());
        assert!(check_endpoints(&r2(Some("https://evil.example.com"))).is_err());
        assert!(check_endpoints(&r2(Some("http://abc123.r2.cloudflarestorage.com"))).is_err());
    }
}

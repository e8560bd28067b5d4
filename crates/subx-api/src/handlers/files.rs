//! Signed file access for the filesystem store.
//!
//! Presigned URLs from `LocalStore` point here. Each carries an HMAC token
//! bound to the key and the HTTP method.

use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use subx_storage::keys::content_type_for;
use subx_storage::{LocalStore, TokenMethod};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub token: Option<String>,
}

fn authorize<'a>(
    state: &'a AppState,
    key: &str,
    token: Option<&str>,
    method: TokenMethod,
) -> ApiResult<&'a LocalStore> {
    let local = state
        .local_files
        .as_deref()
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    let token = token.ok_or_else(|| ApiError::forbidden("Missing file token"))?;
    if !local.verify_token(token, key, method)? {
        return Err(ApiError::forbidden("Invalid or expired file token"));
    }
    Ok(local)
}

/// `GET /files/*key`
pub async fn get_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    let local = authorize(&state, &key, query.token.as_deref(), TokenMethod::Get)?;
    let path = local.path_for(&key)?;

    let file = match File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"))
        }
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .len();

    let stream = futures_util::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; READ_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&key).to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `PUT /files/*key`: the target of a presigned upload.
pub async fn put_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<FileQuery>,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let local = authorize(&state, &key, query.token.as_deref(), TokenMethod::Put)?;
    let path = local.path_for(&key)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }

    let partial = partial_path(&path);
    match write_body(&partial, body).await {
        Ok(size) => {
            tokio::fs::rename(&partial, &path)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            debug!(key = %key, size, "Stored upload");
            Ok((StatusCode::OK, Json(json!({ "key": key, "size": size }))))
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                warn!(key = %key, "Could not remove partial upload: {}", cleanup);
            }
            Err(e)
        }
    }
}

fn partial_path(path: &std::path::Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn write_body(path: &std::path::Path, body: Body) -> ApiResult<u64> {
    let mut file = File::create(path)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let mut stream = body.into_data_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        // The body limit layer surfaces here as a stream error
        let chunk = chunk.map_err(|e| ApiError::bad_request(format!("Upload interrupted: {}", e)))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        let path = std::path::Path::new("/data/users/u1/p1/source/movie.mkv");
        assert_eq!(
            partial_path(path),
            std::path::Path::new("/data/users/u1/p1/source/movie.mkv.part")
        );
    }
}

//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub ffmpeg: bool,
    pub redis: bool,
    pub database: bool,
    pub storage: bool,
}

/// Liveness probe with a summary of each dependency.
///
/// Always 200; `status` is `degraded` when something is down.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ffmpeg = subx_media::check_ffmpeg().is_ok() && subx_media::check_ffprobe().is_ok();
    let (redis, database, storage) = tokio::join!(
        state.queue.ping(),
        state.store.ping(),
        state.objects.check_connectivity(),
    );
    let (redis, database, storage) = (redis.is_ok(), database.is_ok(), storage.is_ok());

    let all_ok = ffmpeg && redis && database && storage;
    Json(HealthResponse {
        status: if all_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
        ffmpeg,
        redis,
        database,
        storage,
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub redis: CheckStatus,
    pub database: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Readiness probe: 503 unless Redis, the database and storage all answer.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let start = Instant::now();
    let redis = CheckStatus::from_result(state.queue.ping().await, start);

    let start = Instant::now();
    let database = CheckStatus::from_result(state.store.ping().await, start);

    let start = Instant::now();
    let storage = CheckStatus::from_result(state.objects.check_connectivity().await, start);

    let all_ok = redis.is_ok() && database.is_ok() && storage.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" },
        checks: ReadinessChecks {
            redis,
            database,
            storage,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

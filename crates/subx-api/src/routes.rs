//! API routes.

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::admin::{
    admin_cancel_job, admin_stats, retry_job, run_cleanup, storage_stats,
};
use crate::handlers::export::{
    active_export, delete_previous_exports, download_export, mark_uploaded, start_export,
};
use crate::handlers::files::{get_file, put_file};
use crate::handlers::glossary::{create_term, delete_term, list_terms};
use crate::handlers::health::{health, ready};
use crate::handlers::jobs::{cancel_job, get_job};
use crate::handlers::projects::{
    create_project, delete_project, export_srt, get_project, list_project_jobs, list_projects,
    list_tracks, storage_info,
};
use crate::handlers::storage::{
    delete_file, file_info, file_url, list_files, rename_file, test_custom, test_saved,
};
use crate::handlers::subtitles::{batch_update_subtitles, get_subtitles, update_style};
use crate::handlers::translate::start_translation;
use crate::handlers::uploads::presign_upload;
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
};
use crate::state::AppState;
use crate::ws::job_progress;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Uploads and projects
        .route("/uploads/presign", post(presign_upload))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:id", get(get_project).delete(delete_project))
        .route("/projects/:id/tracks", get(list_tracks))
        .route("/projects/:id/subtitles", get(get_subtitles))
        .route("/projects/:id/subtitles/batch", patch(batch_update_subtitles))
        .route("/projects/:id/style", put(update_style))
        .route("/projects/:id/export-srt", get(export_srt))
        .route("/projects/:id/jobs", get(list_project_jobs))
        .route("/storage/info", get(storage_info))
        // Translate and jobs
        .route("/translate", post(start_translation))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        // Export
        .route("/export", post(start_export))
        .route("/export/:job_id/download", get(download_export))
        .route("/export/active/:project_id", get(active_export))
        .route(
            "/export/previous/:project_id",
            delete(delete_previous_exports),
        )
        .route("/export/:project_id/uploaded-to-own-storage", post(mark_uploaded))
        // Glossary
        .route("/glossary", get(list_terms).post(create_term))
        .route("/glossary/:id", delete(delete_term))
        // User storage
        .route("/storage-config/test", post(test_saved))
        .route("/storage-config/test-custom", post(test_custom))
        .route("/storage-config/files", get(list_files).delete(delete_file))
        .route("/storage-config/files/info", get(file_info))
        .route("/storage-config/files/url", get(file_url))
        .route("/storage-config/files/rename", post(rename_file))
        // Admin
        .route("/admin/stats", get(admin_stats))
        .route("/admin/storage", get(storage_stats))
        .route("/admin/storage/cleanup", post(run_cleanup))
        .route("/admin/jobs/:id/cancel", post(admin_cancel_job))
        .route("/admin/jobs/:id/retry", post(retry_job))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout,
        ))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let ws_routes = Router::new().route("/api/ws/jobs/:id", get(job_progress));

    let mut health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));
    if let Some(handle) = state.metrics.clone() {
        health_routes = health_routes.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    // Uploads to the local store bypass the JSON body limit
    let file_routes = Router::new()
        .route("/files/*key", get(get_file).put(put_file))
        .layer(RequestBodyLimitLayer::new(
            usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX),
        ));

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .merge(file_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

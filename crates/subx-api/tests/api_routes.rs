//! Router-level tests against the in-memory store and a filesystem object store.
//!
//! Redis is pointed at a closed port, so nothing here enqueues successfully;
//! paths that must reach the queue are covered in the worker and queue crates.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use subx_api::auth::{SupabaseClaims, SUPABASE_AUDIENCE};
use subx_api::{create_router, ApiConfig, AppState};
use subx_db::{
    JobRow, MemoryStore, ProfileRow, ProjectRow, Store, StoredFileRow, SubtitleFileRow,
    UserApiKeyRow, UserStorageConfigRow,
};
use subx_models::{
    EngineKind, FileType, JobKind, JobStatus, Plan, ProjectStatus, SubtitleFormat,
};
use subx_queue::{JobQueue, QueueConfig};
use subx_storage::{LocalStore, ObjectStore};

const SECRET: &str = "test-jwt-secret";
const USER: &str = "user-1";
const ADMIN: &str = "admin-1";

const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n\n";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    local: Arc<LocalStore>,
    _dir: TempDir,
}

fn token_for(user_id: &str) -> String {
    let claims = SupabaseClaims {
        sub: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        aud: SUPABASE_AUDIENCE.to_string(),
        exp: Utc::now().timestamp() + 3600,
        role: Some("authenticated".to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn setup_with(profile: ProfileRow) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.put_profile(profile).await;

    let local = Arc::new(
        LocalStore::new(dir.path().join("objects"), "file-secret", "")
            .await
            .unwrap(),
    );
    let queue = Arc::new(
        JobQueue::new(QueueConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap(),
    );

    let config = ApiConfig {
        jwt_secret: SECRET.to_string(),
        ..Default::default()
    };
    let state = AppState::new(config, store.clone(), local.clone(), queue)
        .with_local_files(local.clone());

    TestApp {
        router: create_router(state),
        store,
        local,
        _dir: dir,
    }
}

async fn setup() -> TestApp {
    setup_with(ProfileRow::new(USER, Some("user-1@example.com".into()))).await
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_as(USER, method, uri, body).await
    }

    async fn send_as(
        &self,
        user_id: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user_id)));
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.raw(builder.body(body).unwrap()).await
    }

    async fn raw(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// A ready project with one SRT track already stored.
    async fn project_with_track(&self) -> (ProjectRow, SubtitleFileRow) {
        let mut project = ProjectRow::new(USER, "Movie.mkv");
        project.status = ProjectStatus::Ready;
        let project = self.store.insert_project(&project).await.unwrap();

        let key = format!("users/{}/{}/subtitles/track_0.srt", USER, project.id);
        self.local
            .upload_bytes(&key, SRT.as_bytes().to_vec(), "application/x-subrip")
            .await
            .unwrap();
        let track = self
            .store
            .insert_subtitle_file(&SubtitleFileRow::new(
                project.id.clone(),
                SubtitleFormat::Srt,
                "en",
                0,
                key,
            ))
            .await
            .unwrap();
        (project, track)
    }
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = setup().await;
    let request = Request::builder()
        .uri("/api/projects")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.raw(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_health_reports_dependencies() {
    let app = setup().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = app.raw(request).await;
    assert_eq!(status, StatusCode::OK);
    for field in ["status", "version", "ffmpeg", "redis", "database", "storage"] {
        assert!(body.get(field).is_some(), "missing {}", field);
    }
    // Nothing listens on the configured Redis port
    assert_eq!(body["redis"], false);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_glossary_crud() {
    let app = setup().await;

    let (status, term) = app
        .send(
            Method::POST,
            "/api/glossary",
            Some(json!({"source_term": "spaceship", "target_term": "uzay gemisi", "source_lang": "en", "target_lang": "tr"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = term["id"].as_str().unwrap().to_string();

    let (status, list) = app.send(Method::GET, "/api/glossary?target_lang=tr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, list) = app.send(Method::GET, "/api/glossary?target_lang=de", None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = app
        .send(Method::POST, "/api/glossary", Some(json!({"source_term": "", "target_term": "x"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/glossary/{}", id);
    let (status, _) = app.send(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_foreign_project_is_not_found() {
    let app = setup().await;
    let project = app
        .store
        .insert_project(&ProjectRow::new("someone-else", "Theirs.mkv"))
        .await
        .unwrap();

    let (status, _) = app
        .send(Method::GET, &format!("/api/projects/{}", project.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/projects/{}", project.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.store.get_project(&project.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_presign_checks_type_and_size() {
    let app = setup().await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/uploads/presign",
            Some(json!({"file_name": "notes.txt", "size_bytes": 10})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Above the free plan's storage but below the upload limit
    let too_big = Plan::free().storage_limit_bytes() + 1;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/uploads/presign",
            Some(json!({"file_name": "movie.mkv", "size_bytes": too_big})),
        )
        .await;
    assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(body["code"], "insufficient_storage");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/uploads/presign",
            Some(json!({"file_name": "movie.mkv", "content_type": "video/x-matroska", "size_bytes": 1024})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["key"].as_str().unwrap().starts_with("uploads/"));
    assert!(body["upload_url"].as_str().unwrap().starts_with("/files/uploads/"));
}

#[tokio::test]
async fn test_create_project_limits() {
    let mut profile = ProfileRow::new(USER, None);
    profile.daily_jobs_used = Plan::free().daily_job_limit;
    profile.daily_jobs_reset_at = Some(Utc::now().date_naive());
    let app = setup_with(profile).await;

    let request = json!({
        "name": "Movie",
        "upload_key": "uploads/abc/movie.mkv",
        "file_name": "movie.mkv",
    });
    let (status, body) = app.send(Method::POST, "/api/projects", Some(request)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_create_project_requires_uploaded_object() {
    let app = setup().await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/projects",
            Some(json!({"name": "Movie", "upload_key": "uploads/missing/movie.mkv", "file_name": "movie.mkv"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/projects",
            Some(json!({"name": "Movie", "upload_key": "users/x/../../etc/passwd", "file_name": "movie.mkv"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.list_projects(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_style_update_moves_project_to_editing() {
    let app = setup().await;
    let (project, _) = app.project_with_track().await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/projects/{}/style", project.id),
            Some(json!({"font_size": 32})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "editing");

    let stored = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Editing);
    assert!(stored.subtitle_style.is_some());
}

#[tokio::test]
async fn test_batch_edit_writes_translated_track() {
    let app = setup().await;
    let (project, track) = app.project_with_track().await;

    let uri = format!("/api/projects/{}/subtitles/batch", project.id);
    let edits = json!({ "edits": { format!("{}_2", track.id): "Dünya" } });
    let (status, body) = app.send(Method::PATCH, &uri, Some(edits)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);

    let track = app.store.get_subtitle_file(&track.id).await.unwrap().unwrap();
    let key = track.translated_file_url.clone().unwrap();
    let written = String::from_utf8(app.local.download_bytes(&key).await.unwrap()).unwrap();
    assert!(written.contains("Dünya"));
    assert!(written.contains("00:00:03,000 --> 00:00:04,000"));

    let stored = app.store.stored_files().await;
    assert!(stored
        .iter()
        .any(|f| f.file_type == FileType::TranslatedSubtitle && f.storage_path == key));

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/projects/{}/subtitles?subtitle_file_id={}", project.id, track.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_lines"], 2);
    assert_eq!(body["lines"][1]["translated_text"], "Dünya");
    assert_eq!(body["lines"][1]["original_text"], "World");

    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Editing);
}

#[tokio::test]
async fn test_batch_edit_rejects_bad_line_ids() {
    let app = setup().await;
    let (project, _) = app.project_with_track().await;

    let uri = format!("/api/projects/{}/subtitles/batch", project.id);
    let (status, _) = app
        .send(Method::PATCH, &uri, Some(json!({ "edits": { "nonsense": "x" } })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(Method::PATCH, &uri, Some(json!({ "edits": { "other-file_1": "x" } })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_translate_without_key_is_forbidden() {
    let app = setup().await;
    let (project, track) = app.project_with_track().await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/translate",
            Some(json!({"project_id": project.id, "engine": "openai", "target_lang": "tr"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/translate",
            Some(json!({
                "project_id": project.id,
                "subtitle_file_id": track.id,
                "engine": "openai",
                "target_lang": "tr",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
    assert!(app.store.list_jobs_for_project(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_translate_line_quota() {
    let mut profile = ProfileRow::new(USER, None);
    profile.lines_used_this_month = Plan::free().lines_per_month;
    let app = setup_with(profile).await;
    let (project, track) = app.project_with_track().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/translate",
            Some(json!({
                "project_id": project.id,
                "subtitle_file_id": track.id,
                "target_lang": "tr",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_translate_rolls_back_when_queue_is_down() {
    let app = setup().await;
    app.store
        .put_api_key(UserApiKeyRow {
            id: "key-1".into(),
            user_id: USER.into(),
            engine: EngineKind::OpenAi,
            api_key_encrypted: "sk-user".into(),
            model_id: None,
            is_default: true,
        })
        .await;
    let (project, track) = app.project_with_track().await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/translate",
            Some(json!({"project_id": project.id, "subtitle_file_id": track.id, "target_lang": "tr"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let jobs = app.store.list_jobs_for_project(&project.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    // The key never lands on the row
    let stored_config = jobs[0].config.clone().unwrap();
    assert!(!stored_config.to_string().contains("sk-user"));

    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
}

#[tokio::test]
async fn test_translate_busy_project_conflicts() {
    let app = setup().await;
    let (project, track) = app.project_with_track().await;
    app.store
        .update_project(&project.id, &subx_db::ProjectPatch::status(ProjectStatus::Exporting))
        .await
        .unwrap();

    let (status, _) = app
        .send(
            Method::POST,
            "/api/translate",
            Some(json!({"project_id": project.id, "subtitle_file_id": track.id, "target_lang": "tr"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_job() {
    let app = setup().await;
    let (project, _) = app.project_with_track().await;
    app.store
        .update_project(&project.id, &subx_db::ProjectPatch::status(ProjectStatus::Translating))
        .await
        .unwrap();

    let queued = app
        .store
        .insert_job(&JobRow::new(USER, project.id.clone(), JobKind::Translate, None))
        .await
        .unwrap();
    let mut done = JobRow::new(USER, project.id.clone(), JobKind::Export, None);
    done.status = JobStatus::Completed;
    let done = app.store.insert_job(&done).await.unwrap();

    let (status, _) = app
        .send(Method::POST, &format!("/api/jobs/{}/cancel", done.id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send_as("intruder", Method::POST, &format!("/api/jobs/{}/cancel", queued.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(Method::POST, &format!("/api/jobs/{}/cancel", queued.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let job = app.store.get_job(&queued.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
}

#[tokio::test]
async fn test_export_download_requires_completion() {
    let app = setup().await;
    let (project, _) = app.project_with_track().await;
    let job = app
        .store
        .insert_job(&JobRow::new(USER, project.id.clone(), JobKind::Export, None))
        .await
        .unwrap();

    let (status, _) = app
        .send(Method::GET, &format!("/api/export/{}/download", job.id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(Method::GET, &format!("/api/export/active/{}", project.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], job.id.to_string());

    // No translated track yet
    let (status, _) = app
        .send(Method::POST, "/api/export", Some(json!({"project_id": project.id})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_local_files_require_valid_token() {
    let app = setup().await;
    let (_, track) = app.project_with_track().await;

    let url = app
        .local
        .presign_get(&track.file_url, std::time::Duration::from_secs(60))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), SRT.as_bytes());

    let (path, _) = url.split_once('?').unwrap();
    let (status, _) = app
        .raw(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .raw(
            Request::builder()
                .uri(format!("{}?token=forged", path))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A GET token does not allow writes
    let (status, _) = app
        .raw(
            Request::builder()
                .method(Method::PUT)
                .uri(&url)
                .body(Body::from("overwrite"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_storage_config_without_saved_bucket() {
    let app = setup().await;

    let (status, body) = app.send(Method::GET, "/api/storage-config/files", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["objects"], json!([]));

    let (status, _) = app.send(Method::POST, "/api/storage-config/test", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/storage-config/test-custom",
            Some(json!({
                "provider": "r2",
                "r2_endpoint": "https://169.254.169.254",
                "r2_access_key": "k",
                "r2_secret_key": "s",
                "r2_bucket_name": "b",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_saved_storage_endpoint_is_checked() {
    let app = setup().await;
    let row: UserStorageConfigRow = serde_json::from_value(json!({
        "user_id": USER,
        "provider": "r2",
        "r2_endpoint": "https://10.0.0.5",
        "r2_access_key": "k",
        "r2_secret_key": "s",
        "r2_bucket_name": "mine",
        "is_active": true,
    }))
    .unwrap();
    app.store.put_storage_config(row).await;

    let (status, _) = app.send(Method::POST, "/api/storage-config/test", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(Method::GET, "/api/storage-config/files/info?key=../etc/passwd", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

impl TestApp {
    async fn with_admin(self) -> Self {
        let mut admin = ProfileRow::new(ADMIN, None);
        admin.role = Some("admin".into());
        self.store.put_profile(admin).await;
        self
    }

    async fn failed_job(&self, project: &ProjectRow, kind: JobKind, config: Value) -> JobRow {
        let mut job = JobRow::new(USER, project.id.clone(), kind, Some(config));
        job.status = JobStatus::Failed;
        job.error_message = Some("engine exploded".into());
        self.store.insert_job(&job).await.unwrap()
    }
}

#[tokio::test]
async fn test_admin_routes_need_admin_role() {
    let app = setup().await.with_admin().await;
    for (method, uri) in [
        (Method::GET, "/api/admin/stats"),
        (Method::GET, "/api/admin/storage"),
        (Method::POST, "/api/admin/storage/cleanup"),
        (Method::POST, "/api/admin/jobs/any/cancel"),
        (Method::POST, "/api/admin/jobs/any/retry"),
    ] {
        let (status, _) = app.send(method, uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn test_admin_stats_counts_everything() {
    let app = setup().await.with_admin().await;
    let (project, _) = app.project_with_track().await;
    app.store
        .insert_job(&JobRow::new(USER, project.id.clone(), JobKind::Translate, None))
        .await
        .unwrap();
    app.failed_job(&project, JobKind::Export, json!({})).await;
    app.store
        .insert_stored_file(&StoredFileRow::new(
            USER,
            Some(project.id.clone()),
            FileType::SourceVideo,
            "users/user-1/source/a.mkv",
            1_000,
        ))
        .await
        .unwrap();

    let (status, body) = app.send_as(ADMIN, Method::GET, "/api/admin/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_users"], 2);
    assert_eq!(body["total_projects"], 1);
    assert_eq!(body["total_translation_jobs"], 1);
    assert_eq!(body["total_export_jobs"], 1);
    assert_eq!(body["total_extract_jobs"], 0);
    assert_eq!(body["active_jobs"], 1);
    assert_eq!(body["failed_jobs"], 1);
    assert_eq!(body["total_storage_bytes"], 1_000);
    // Redis is down; lengths fall back to zero
    assert_eq!(body["queue_length"], 0);
}

#[tokio::test]
async fn test_admin_storage_breakdown() {
    let app = setup().await.with_admin().await;
    let (project, _) = app.project_with_track().await;
    for (file_type, size) in [
        (FileType::SourceVideo, 5_000),
        (FileType::Subtitle, 100),
        (FileType::Subtitle, 50),
    ] {
        app.store
            .insert_stored_file(&StoredFileRow::new(
                USER,
                Some(project.id.clone()),
                file_type,
                format!("users/user-1/{}/{}", file_type.key_segment(), size),
                size,
            ))
            .await
            .unwrap();
    }
    let mut heavy = ProfileRow::new(USER, None);
    heavy.storage_used_bytes = 5_150;
    app.store.put_profile(heavy).await;

    let (status, body) = app.send_as(ADMIN, Method::GET, "/api/admin/storage", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_files"], 3);
    assert_eq!(body["total_bytes"], 5_150);
    assert_eq!(body["file_type_breakdown"]["subtitle"]["count"], 2);
    assert_eq!(body["file_type_breakdown"]["subtitle"]["bytes"], 150);
    assert_eq!(body["top_users"][0]["id"], USER);
}

#[tokio::test]
async fn test_admin_cleanup_removes_expired_files() {
    let app = setup().await.with_admin().await;
    let (project, _) = app.project_with_track().await;
    let key = "users/user-1/source/old.mkv";
    app.local
        .upload_bytes(key, vec![0u8; 64], "video/x-matroska")
        .await
        .unwrap();
    let mut old = StoredFileRow::new(USER, Some(project.id.clone()), FileType::SourceVideo, key, 64);
    old.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
    app.store.insert_stored_file(&old).await.unwrap();

    let (status, body) = app
        .send_as(ADMIN, Method::POST, "/api/admin/storage/cleanup", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 1);
    assert!(app.store.stored_files().await.is_empty());
    assert!(!app.local.exists(key).await.unwrap());
}

#[tokio::test]
async fn test_admin_cancels_any_users_job() {
    let app = setup().await.with_admin().await;
    let (project, _) = app.project_with_track().await;
    app.store
        .update_project(&project.id, &subx_db::ProjectPatch::status(ProjectStatus::Translating))
        .await
        .unwrap();
    let job = app
        .store
        .insert_job(&JobRow::new(USER, project.id.clone(), JobKind::Translate, None))
        .await
        .unwrap();

    let (status, body) = app
        .send_as(ADMIN, Method::POST, &format!("/api/admin/jobs/{}/cancel", job.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    let job = app.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
}

#[tokio::test]
async fn test_admin_retry_only_failed_jobs() {
    let app = setup().await.with_admin().await;
    let (project, _) = app.project_with_track().await;
    let running = app
        .store
        .insert_job(&JobRow::new(USER, project.id.clone(), JobKind::Export, None))
        .await
        .unwrap();

    let (status, _) = app
        .send_as(ADMIN, Method::POST, &format!("/api/admin/jobs/{}/retry", running.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send_as(ADMIN, Method::POST, "/api/admin/jobs/missing/retry", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_retry_translation_needs_a_key() {
    let app = setup().await.with_admin().await;
    let (project, track) = app.project_with_track().await;
    let job = app
        .failed_job(
            &project,
            JobKind::Translate,
            json!({"subtitle_file_id": track.id, "engine": "openai", "source_lang": "en", "target_lang": "tr"}),
        )
        .await;

    let (status, _) = app
        .send_as(ADMIN, Method::POST, &format!("/api/admin/jobs/{}/retry", job.id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let job = app.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_admin_retry_rolls_back_when_queue_is_down() {
    let app = setup().await.with_admin().await;
    app.store
        .put_api_key(UserApiKeyRow {
            id: "key-1".into(),
            user_id: USER.into(),
            engine: EngineKind::OpenAi,
            api_key_encrypted: "sk-user".into(),
            model_id: None,
            is_default: true,
        })
        .await;
    let (project, track) = app.project_with_track().await;
    let job = app
        .failed_job(
            &project,
            JobKind::Translate,
            json!({"subtitle_file_id": track.id, "engine": "openai", "source_lang": "en", "target_lang": "tr"}),
        )
        .await;

    let (status, _) = app
        .send_as(ADMIN, Method::POST, &format!("/api/admin/jobs/{}/retry", job.id), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let job = app.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("Could not queue retry"));
    assert!(!job.config.unwrap().to_string().contains("sk-user"));
    let project = app.store.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
}

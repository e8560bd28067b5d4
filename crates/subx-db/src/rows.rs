//! Hand-written row structs, one per table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use subx_models::{
    EngineKind, FileType, JobId, JobKind, JobResult, JobStatus, MediaInfo, Plan,
    ProjectId, ProjectStatus, StorageProvider, SubtitleFormat, SubtitleStyle, TranslateConfig,
};

/// `subscription_plans` rows map straight onto the domain plan.
pub type PlanRow = Plan;

fn default_plan_id() -> String {
    "free".to_string()
}

/// `profiles`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_plan_id")]
    pub plan_id: String,
    #[serde(default)]
    pub lines_used_this_month: i64,
    #[serde(default)]
    pub daily_jobs_used: i64,
    #[serde(default)]
    pub daily_jobs_reset_at: Option<NaiveDate>,
    #[serde(default)]
    pub storage_used_bytes: i64,
    #[serde(default)]
    pub role: Option<String>,
}

impl ProfileRow {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            plan_id: default_plan_id(),
            lines_used_this_month: 0,
            daily_jobs_used: 0,
            daily_jobs_reset_at: None,
            storage_used_bytes: 0,
            role: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// `projects`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<i64>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    /// Object key of the uploaded source.
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub media_info: Option<MediaInfo>,
    #[serde(default)]
    pub total_lines: i64,
    #[serde(default)]
    pub translated_lines: i64,
    #[serde(default)]
    pub subtitle_style: Option<SubtitleStyle>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            user_id: user_id.into(),
            name: name.into(),
            file_name: None,
            file_size_bytes: None,
            status: ProjectStatus::Processing,
            source_lang: None,
            target_lang: None,
            file_url: None,
            duration_seconds: None,
            video_codec: None,
            media_info: None,
            total_lines: 0,
            translated_lines: 0,
            subtitle_style: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Extension of the uploaded file including the dot, if any.
    pub fn source_extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let ext = std::path::Path::new(name).extension()?.to_str()?;
        Some(format!(".{}", ext.to_ascii_lowercase()))
    }
}

/// `jobs`: one row per extract, translate and export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub id: JobId,
    pub user_id: String,
    pub project_id: ProjectId,
    pub kind: JobKind,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Kind-specific payload: the upload for extracts, `TranslateConfig`
    /// (key redacted) or `ExportConfig`.
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(flatten)]
    pub result: JobResult,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    pub fn new(
        user_id: impl Into<String>,
        project_id: ProjectId,
        kind: JobKind,
        config: Option<Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            project_id,
            kind,
            status: JobStatus::Queued,
            progress: 0,
            attempts: 0,
            error_message: None,
            config,
            result: JobResult::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn translate_config(&self) -> Option<TranslateConfig> {
        self.config
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// `subtitle_files`: one row per extracted or uploaded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleFileRow {
    pub id: String,
    pub project_id: ProjectId,
    pub format: SubtitleFormat,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub track_index: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub total_lines: i64,
    /// Object key of the original track.
    pub file_url: String,
    #[serde(default)]
    pub translated_file_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_language() -> String {
    "und".to_string()
}

impl SubtitleFileRow {
    pub fn new(
        project_id: ProjectId,
        format: SubtitleFormat,
        language: impl Into<String>,
        track_index: u32,
        file_url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            format,
            language: language.into(),
            track_index,
            title: None,
            total_lines: 0,
            file_url: file_url.into(),
            translated_file_url: None,
            created_at: Utc::now(),
        }
    }
}

/// `stored_files`: storage accounting and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFileRow {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub file_type: FileType,
    pub storage_path: String,
    #[serde(default)]
    pub file_size_bytes: i64,
    #[serde(default)]
    pub cdn_url: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uploaded_to_user_storage: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StoredFileRow {
    pub fn new(
        user_id: impl Into<String>,
        project_id: Option<ProjectId>,
        file_type: FileType,
        storage_path: impl Into<String>,
        file_size_bytes: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            project_id,
            file_type,
            storage_path: storage_path.into(),
            file_size_bytes,
            cdn_url: None,
            expires_at: None,
            uploaded_to_user_storage: false,
            created_at: Utc::now(),
        }
    }

    /// Expire `retention_days` from now.
    pub fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.expires_at = Some(Utc::now() + chrono::Duration::days(retention_days.max(0)));
        self
    }

    pub fn with_cdn_url(mut self, cdn_url: Option<String>) -> Self {
        self.cdn_url = cdn_url;
        self
    }

    /// Counts against the user's quota and is subject to cleanup.
    pub fn is_managed(&self) -> bool {
        !self.uploaded_to_user_storage
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_managed() && self.expires_at.is_some_and(|at| at < now)
    }
}

/// `glossary_terms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTermRow {
    pub id: String,
    pub user_id: String,
    pub source_term: String,
    pub target_term: String,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl GlossaryTermRow {
    pub fn new(
        user_id: impl Into<String>,
        source_term: impl Into<String>,
        target_term: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            source_term: source_term.into(),
            target_term: target_term.into(),
            source_lang: None,
            target_lang: None,
            created_at: Utc::now(),
        }
    }

    /// A term without a language pair applies to every pair.
    pub fn applies_to(&self, source_lang: &str, target_lang: &str) -> bool {
        self.source_lang.as_deref().map_or(true, |l| l == source_lang)
            && self.target_lang.as_deref().map_or(true, |l| l == target_lang)
    }
}

/// `translation_engines`: system-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRow {
    pub id: EngineKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_encrypted: Option<String>,
    #[serde(default)]
    pub cost_per_line: f64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

impl EngineRow {
    pub fn system_key(&self) -> Option<&str> {
        self.api_key_encrypted.as_deref().filter(|k| !k.is_empty())
    }
}

/// `user_api_keys`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserApiKeyRow {
    pub id: String,
    pub user_id: String,
    pub engine: EngineKind,
    pub api_key_encrypted: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// `user_storage_configs`: a user's own R2 or B2 bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStorageConfigRow {
    pub user_id: String,
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default)]
    pub r2_account_id: Option<String>,
    #[serde(default)]
    pub r2_access_key: Option<String>,
    #[serde(default)]
    pub r2_secret_key: Option<String>,
    #[serde(default)]
    pub r2_bucket_name: Option<String>,
    #[serde(default)]
    pub r2_endpoint: Option<String>,
    #[serde(default)]
    pub b2_key_id: Option<String>,
    #[serde(default)]
    pub b2_app_key: Option<String>,
    #[serde(default)]
    pub b2_bucket_name: Option<String>,
    #[serde(default)]
    pub b2_endpoint: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub last_test_result: Option<String>,
}

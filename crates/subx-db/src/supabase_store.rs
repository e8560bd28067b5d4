//! `Store` over the PostgREST client.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use subx_models::{EngineKind, JobId, JobKind, JobStatus, ProjectId};

use crate::client::{Query, SupabaseClient};
use crate::error::{DbError, DbResult};
use crate::patch::{JobPatch, ProjectPatch, SubtitleFilePatch};
use crate::rows::{
    EngineRow, GlossaryTermRow, JobRow, PlanRow, ProfileRow, ProjectRow, StoredFileRow,
    SubtitleFileRow, UserApiKeyRow, UserStorageConfigRow,
};
use crate::store::{Store, StoredFileQuery};

const PROFILES: &str = "profiles";
const PLANS: &str = "subscription_plans";
const PROJECTS: &str = "projects";
const JOBS: &str = "jobs";
const SUBTITLE_FILES: &str = "subtitle_files";
const STORED_FILES: &str = "stored_files";
const GLOSSARY: &str = "glossary_terms";
const ENGINES: &str = "translation_engines";
const USER_API_KEYS: &str = "user_api_keys";
const USER_STORAGE: &str = "user_storage_configs";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Supabase-backed store.
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> DbResult<Self> {
        Ok(Self::new(SupabaseClient::from_env()?))
    }

    pub fn client(&self) -> &SupabaseClient {
        &self.client
    }

    async fn update_one<B: serde::Serialize + ?Sized>(
        &self,
        query: Query,
        body: &B,
        what: &str,
    ) -> DbResult<()> {
        let rows: Vec<Value> = self.client.update(&query, body).await?;
        if rows.is_empty() {
            return Err(DbError::not_found(what));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn get_profile(&self, user_id: &str) -> DbResult<Option<ProfileRow>> {
        self.client
            .select_one(&Query::table(PROFILES).eq("id", user_id))
            .await
    }

    async fn get_plan(&self, plan_id: &str) -> DbResult<Option<PlanRow>> {
        self.client
            .select_one(&Query::table(PLANS).eq("id", plan_id))
            .await
    }

    async fn increment_lines_used(&self, user_id: &str, lines: i64) -> DbResult<()> {
        let _: Value = self
            .client
            .rpc(
                "increment_lines_used",
                &json!({ "user_id_param": user_id, "lines_count": lines }),
            )
            .await?;
        Ok(())
    }

    async fn reset_monthly_usage(&self) -> DbResult<u64> {
        let rows: Vec<Value> = self
            .client
            .update(
                &Query::table(PROFILES).neq("lines_used_this_month", 0).select("id"),
                &json!({ "lines_used_this_month": 0 }),
            )
            .await?;
        info!(profiles = rows.len(), "Reset monthly line usage");
        Ok(rows.len() as u64)
    }

    async fn daily_jobs_used(&self, user_id: &str) -> DbResult<i64> {
        let used: Option<i64> = self
            .client
            .rpc("check_and_reset_daily_jobs", &json!({ "user_id_param": user_id }))
            .await?;
        Ok(used.unwrap_or(0))
    }

    async fn increment_daily_jobs(&self, user_id: &str) -> DbResult<()> {
        let _: Value = self
            .client
            .rpc("increment_daily_jobs", &json!({ "user_id_param": user_id }))
            .await?;
        Ok(())
    }

    async fn set_storage_used(&self, user_id: &str, bytes: i64) -> DbResult<()> {
        let _: Vec<Value> = self
            .client
            .update(
                &Query::table(PROFILES).eq("id", user_id).select("id"),
                &json!({ "storage_used_bytes": bytes.max(0) }),
            )
            .await?;
        Ok(())
    }

    async fn count_profiles(&self) -> DbResult<u64> {
        self.client.count(&Query::table(PROFILES)).await
    }

    async fn list_profiles_by_storage(&self, limit: usize) -> DbResult<Vec<ProfileRow>> {
        self.client
            .select(
                &Query::table(PROFILES)
                    .order("storage_used_bytes", true)
                    .limit(limit),
            )
            .await
    }

    async fn insert_project(&self, project: &ProjectRow) -> DbResult<ProjectRow> {
        let row: ProjectRow = self.client.insert(PROJECTS, project).await?;
        debug!(project_id = %row.id, "Inserted project");
        Ok(row)
    }

    async fn get_project(&self, id: &ProjectId) -> DbResult<Option<ProjectRow>> {
        self.client
            .select_one(&Query::table(PROJECTS).eq("id", id))
            .await
    }

    async fn get_project_for_user(
        &self,
        id: &ProjectId,
        user_id: &str,
    ) -> DbResult<Option<ProjectRow>> {
        self.client
            .select_one(&Query::table(PROJECTS).eq("id", id).eq("user_id", user_id))
            .await
    }

    async fn list_projects(&self, user_id: &str) -> DbResult<Vec<ProjectRow>> {
        self.client
            .select(
                &Query::table(PROJECTS)
                    .eq("user_id", user_id)
                    .order("created_at", true),
            )
            .await
    }

    async fn update_project(&self, id: &ProjectId, patch: &ProjectPatch) -> DbResult<()> {
        let patch = patch.clone().touch();
        self.update_one(
            Query::table(PROJECTS).eq("id", id).select("id"),
            &patch,
            &format!("project {}", id),
        )
        .await
    }

    async fn delete_project(&self, id: &ProjectId) -> DbResult<bool> {
        let deleted = self
            .client
            .delete(&Query::table(PROJECTS).eq("id", id).select("id"))
            .await?;
        Ok(deleted > 0)
    }

    async fn count_projects(&self) -> DbResult<u64> {
        self.client.count(&Query::table(PROJECTS)).await
    }

    async fn insert_job(&self, job: &JobRow) -> DbResult<JobRow> {
        self.client.insert(JOBS, job).await
    }

    async fn get_job(&self, id: &JobId) -> DbResult<Option<JobRow>> {
        self.client.select_one(&Query::table(JOBS).eq("id", id)).await
    }

    async fn get_job_for_user(&self, id: &JobId, user_id: &str) -> DbResult<Option<JobRow>> {
        self.client
            .select_one(&Query::table(JOBS).eq("id", id).eq("user_id", user_id))
            .await
    }

    async fn update_job(&self, id: &JobId, patch: &JobPatch) -> DbResult<()> {
        let mut patch = patch.clone();
        patch.updated_at = Some(Utc::now());
        self.update_one(
            Query::table(JOBS).eq("id", id).select("id"),
            &patch,
            &format!("job {}", id),
        )
        .await
    }

    async fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> DbResult<bool> {
        let allowed: Vec<&str> = from
            .iter()
            .filter(|status| patch.allowed_from(**status))
            .map(JobStatus::as_str)
            .collect();
        if !allowed.is_empty() {
            let mut patch = patch.clone();
            patch.updated_at = Some(Utc::now());
            let query = Query::table(JOBS)
                .eq("id", id)
                .in_list("status", allowed)
                .select("id");
            let rows: Vec<Value> = self.client.update(&query, &patch).await?;
            if !rows.is_empty() {
                return Ok(true);
            }
        }
        match self.get_job(id).await? {
            Some(_) => Ok(false),
            None => Err(DbError::not_found(format!("job {}", id))),
        }
    }

    async fn count_jobs(&self, kind: Option<JobKind>, statuses: &[JobStatus]) -> DbResult<u64> {
        let mut query = Query::table(JOBS);
        if let Some(kind) = kind {
            query = query.eq("kind", kind.as_str());
        }
        if !statuses.is_empty() {
            query = query.in_list("status", statuses.iter().map(JobStatus::as_str));
        }
        self.client.count(&query).await
    }

    async fn list_jobs_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<JobRow>> {
        self.client
            .select(
                &Query::table(JOBS)
                    .eq("project_id", project_id)
                    .order("created_at", true),
            )
            .await
    }

    async fn insert_subtitle_file(&self, file: &SubtitleFileRow) -> DbResult<SubtitleFileRow> {
        self.client.insert(SUBTITLE_FILES, file).await
    }

    async fn list_subtitle_files(&self, project_id: &ProjectId) -> DbResult<Vec<SubtitleFileRow>> {
        self.client
            .select(
                &Query::table(SUBTITLE_FILES)
                    .eq("project_id", project_id)
                    .order("track_index", false),
            )
            .await
    }

    async fn get_subtitle_file(&self, id: &str) -> DbResult<Option<SubtitleFileRow>> {
        self.client
            .select_one(&Query::table(SUBTITLE_FILES).eq("id", id))
            .await
    }

    async fn update_subtitle_file(&self, id: &str, patch: &SubtitleFilePatch) -> DbResult<()> {
        self.update_one(
            Query::table(SUBTITLE_FILES).eq("id", id).select("id"),
            patch,
            &format!("subtitle file {}", id),
        )
        .await
    }

    async fn insert_stored_file(&self, file: &StoredFileRow) -> DbResult<StoredFileRow> {
        self.client.insert(STORED_FILES, file).await
    }

    async fn list_stored_files(&self, query: &StoredFileQuery) -> DbResult<Vec<StoredFileRow>> {
        let mut q = Query::table(STORED_FILES);
        if let Some(user_id) = &query.user_id {
            q = q.eq("user_id", user_id);
        }
        if let Some(project_id) = &query.project_id {
            q = q.eq("project_id", project_id);
        }
        if let Some(file_type) = query.file_type {
            q = q.eq("file_type", file_type.as_str());
        }
        if query.managed_only {
            q = q.eq("uploaded_to_user_storage", false);
        }
        self.client
            .select(&q.order("created_at", !query.oldest_first))
            .await
    }

    async fn list_expired_stored_files(&self, now: DateTime<Utc>) -> DbResult<Vec<StoredFileRow>> {
        self.client
            .select(
                &Query::table(STORED_FILES)
                    .lt("expires_at", timestamp(now))
                    .eq("uploaded_to_user_storage", false)
                    .order("expires_at", false),
            )
            .await
    }

    async fn delete_stored_files(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.client
            .delete(&Query::table(STORED_FILES).in_list("id", ids).select("id"))
            .await
    }

    async fn update_stored_files_for_project(
        &self,
        project_id: &ProjectId,
        uploaded_to_user_storage: bool,
    ) -> DbResult<u64> {
        let rows: Vec<Value> = self
            .client
            .update(
                &Query::table(STORED_FILES)
                    .eq("project_id", project_id)
                    .select("id"),
                &json!({ "uploaded_to_user_storage": uploaded_to_user_storage }),
            )
            .await?;
        Ok(rows.len() as u64)
    }

    async fn list_glossary(&self, user_id: &str) -> DbResult<Vec<GlossaryTermRow>> {
        self.client
            .select(
                &Query::table(GLOSSARY)
                    .eq("user_id", user_id)
                    .order("created_at", true),
            )
            .await
    }

    async fn insert_glossary_term(&self, term: &GlossaryTermRow) -> DbResult<GlossaryTermRow> {
        self.client.insert(GLOSSARY, term).await
    }

    async fn delete_glossary_term(&self, user_id: &str, id: &str) -> DbResult<bool> {
        let deleted = self
            .client
            .delete(
                &Query::table(GLOSSARY)
                    .eq("id", id)
                    .eq("user_id", user_id)
                    .select("id"),
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn get_engine(&self, engine: EngineKind) -> DbResult<Option<EngineRow>> {
        self.client
            .select_one(&Query::table(ENGINES).eq("id", engine.as_str()))
            .await
    }

    async fn list_user_api_keys(
        &self,
        user_id: &str,
        engine: EngineKind,
    ) -> DbResult<Vec<UserApiKeyRow>> {
        self.client
            .select(
                &Query::table(USER_API_KEYS)
                    .eq("user_id", user_id)
                    .eq("engine", engine.as_str()),
            )
            .await
    }

    async fn get_user_storage_config(
        &self,
        user_id: &str,
    ) -> DbResult<Option<UserStorageConfigRow>> {
        self.client
            .select_one(&Query::table(USER_STORAGE).eq("user_id", user_id))
            .await
    }

    async fn ping(&self) -> DbResult<()> {
        let _: Vec<Value> = self
            .client
            .select(&Query::table(PLANS).select("id").limit(1))
            .await?;
        Ok(())
    }
}

//! The persistence seam shared by the API and the worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use subx_models::{EngineKind, FileType, JobId, JobKind, JobStatus, Plan, ProjectId};

use crate::error::DbResult;
use crate::patch::{JobPatch, ProjectPatch, SubtitleFilePatch};
use crate::rows::{
    EngineRow, GlossaryTermRow, JobRow, PlanRow, ProfileRow, ProjectRow, StoredFileRow,
    SubtitleFileRow, UserApiKeyRow, UserStorageConfigRow,
};

/// Filter for `stored_files` listings.
#[derive(Debug, Clone, Default)]
pub struct StoredFileQuery {
    pub user_id: Option<String>,
    pub project_id: Option<ProjectId>,
    pub file_type: Option<FileType>,
    /// Skip rows already copied to the user's own bucket.
    pub managed_only: bool,
    /// Order by `created_at` ascending instead of descending.
    pub oldest_first: bool,
}

impl StoredFileQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn for_project(project_id: &ProjectId) -> Self {
        Self {
            project_id: Some(project_id.clone()),
            ..Default::default()
        }
    }

    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn managed(mut self) -> Self {
        self.managed_only = true;
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    pub fn matches(&self, row: &StoredFileRow) -> bool {
        self.user_id.as_deref().map_or(true, |u| row.user_id == u)
            && self
                .project_id
                .as_ref()
                .map_or(true, |p| row.project_id.as_ref() == Some(p))
            && self.file_type.map_or(true, |t| row.file_type == t)
            && (!self.managed_only || row.is_managed())
    }
}

/// Row-level persistence operations.
#[async_trait]
pub trait Store: Send + Sync {
    // Profiles and plans

    async fn get_profile(&self, user_id: &str) -> DbResult<Option<ProfileRow>>;

    async fn get_plan(&self, plan_id: &str) -> DbResult<Option<PlanRow>>;

    /// Plan for a profile, falling back to the free tier.
    async fn plan_for_profile(&self, profile: &ProfileRow) -> DbResult<Plan> {
        Ok(self.get_plan(&profile.plan_id).await?.unwrap_or_else(Plan::free))
    }

    async fn increment_lines_used(&self, user_id: &str, lines: i64) -> DbResult<()>;

    /// Zero every profile's monthly line counter. Returns profiles touched.
    async fn reset_monthly_usage(&self) -> DbResult<u64>;

    /// Jobs started today, resetting the counter when the day rolled over.
    async fn daily_jobs_used(&self, user_id: &str) -> DbResult<i64>;

    async fn increment_daily_jobs(&self, user_id: &str) -> DbResult<()>;

    async fn set_storage_used(&self, user_id: &str, bytes: i64) -> DbResult<()>;

    async fn count_profiles(&self) -> DbResult<u64>;

    /// Heaviest storage users first.
    async fn list_profiles_by_storage(&self, limit: usize) -> DbResult<Vec<ProfileRow>>;

    // Projects

    async fn insert_project(&self, project: &ProjectRow) -> DbResult<ProjectRow>;

    async fn get_project(&self, id: &ProjectId) -> DbResult<Option<ProjectRow>>;

    async fn get_project_for_user(
        &self,
        id: &ProjectId,
        user_id: &str,
    ) -> DbResult<Option<ProjectRow>>;

    /// Newest first.
    async fn list_projects(&self, user_id: &str) -> DbResult<Vec<ProjectRow>>;

    async fn update_project(&self, id: &ProjectId, patch: &ProjectPatch) -> DbResult<()>;

    async fn delete_project(&self, id: &ProjectId) -> DbResult<bool>;

    async fn count_projects(&self) -> DbResult<u64>;

    // Jobs

    async fn insert_job(&self, job: &JobRow) -> DbResult<JobRow>;

    async fn get_job(&self, id: &JobId) -> DbResult<Option<JobRow>>;

    async fn get_job_for_user(&self, id: &JobId, user_id: &str) -> DbResult<Option<JobRow>>;

    async fn update_job(&self, id: &JobId, patch: &JobPatch) -> DbResult<()>;

    /// Apply `patch` only while the row's status is one of `from` and the
    /// patch's status is a legal move from it. Returns false when the row
    /// has already moved on.
    async fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> DbResult<bool>;

    /// Jobs of `kind` (any kind for `None`) whose status is one of
    /// `statuses` (any status when empty).
    async fn count_jobs(&self, kind: Option<JobKind>, statuses: &[JobStatus]) -> DbResult<u64>;

    /// Newest first.
    async fn list_jobs_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<JobRow>>;

    // Subtitle files

    async fn insert_subtitle_file(&self, file: &SubtitleFileRow) -> DbResult<SubtitleFileRow>;

    /// Ordered by track index.
    async fn list_subtitle_files(&self, project_id: &ProjectId) -> DbResult<Vec<SubtitleFileRow>>;

    async fn get_subtitle_file(&self, id: &str) -> DbResult<Option<SubtitleFileRow>>;

    async fn update_subtitle_file(&self, id: &str, patch: &SubtitleFilePatch) -> DbResult<()>;

    // Stored files

    async fn insert_stored_file(&self, file: &StoredFileRow) -> DbResult<StoredFileRow>;

    async fn list_stored_files(&self, query: &StoredFileQuery) -> DbResult<Vec<StoredFileRow>>;

    /// Managed rows whose `expires_at` is before `now`.
    async fn list_expired_stored_files(&self, now: DateTime<Utc>) -> DbResult<Vec<StoredFileRow>>;

    async fn delete_stored_files(&self, ids: &[String]) -> DbResult<u64>;

    /// Set `uploaded_to_user_storage` on every row of a project.
    async fn update_stored_files_for_project(
        &self,
        project_id: &ProjectId,
        uploaded_to_user_storage: bool,
    ) -> DbResult<u64>;

    // Glossary

    async fn list_glossary(&self, user_id: &str) -> DbResult<Vec<GlossaryTermRow>>;

    async fn insert_glossary_term(&self, term: &GlossaryTermRow) -> DbResult<GlossaryTermRow>;

    async fn delete_glossary_term(&self, user_id: &str, id: &str) -> DbResult<bool>;

    // Engines and keys

    async fn get_engine(&self, engine: EngineKind) -> DbResult<Option<EngineRow>>;

    async fn list_user_api_keys(
        &self,
        user_id: &str,
        engine: EngineKind,
    ) -> DbResult<Vec<UserApiKeyRow>>;

    // User storage

    async fn get_user_storage_config(&self, user_id: &str)
        -> DbResult<Option<UserStorageConfigRow>>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> DbResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_file_query_matches() {
        let project = ProjectId::from_string("p1");
        let mut row = StoredFileRow::new("u1", Some(project.clone()), FileType::ExportVideo, "k", 5);

        assert!(StoredFileQuery::for_user("u1").matches(&row));
        assert!(!StoredFileQuery::for_user("u2").matches(&row));
        assert!(StoredFileQuery::for_project(&project)
            .file_type(FileType::ExportVideo)
            .matches(&row));
        assert!(!StoredFileQuery::for_project(&project)
            .file_type(FileType::Subtitle)
            .matches(&row));

        row.uploaded_to_user_storage = true;
        assert!(!StoredFileQuery::for_user("u1").managed().matches(&row));
    }
}

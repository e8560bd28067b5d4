//! In-memory `Store` for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use subx_models::{EngineKind, JobId, JobKind, JobStatus, Plan, ProjectId};

use crate::error::{DbError, DbResult};
use crate::patch::{JobPatch, ProjectPatch, SubtitleFilePatch};
use crate::rows::{
    EngineRow, GlossaryTermRow, JobRow, PlanRow, ProfileRow, ProjectRow, StoredFileRow,
    SubtitleFileRow, UserApiKeyRow, UserStorageConfigRow,
};
use crate::store::{Store, StoredFileQuery};

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, ProfileRow>,
    plans: HashMap<String, PlanRow>,
    projects: HashMap<ProjectId, ProjectRow>,
    jobs: HashMap<JobId, JobRow>,
    subtitle_files: HashMap<String, SubtitleFileRow>,
    stored_files: HashMap<String, StoredFileRow>,
    glossary: Vec<GlossaryTermRow>,
    engines: HashMap<EngineKind, EngineRow>,
    api_keys: Vec<UserApiKeyRow>,
    storage_configs: HashMap<String, UserStorageConfigRow>,
}

/// Process-local store. The free plan is always present.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut tables = Tables::default();
        let free = Plan::free();
        tables.plans.insert(free.id.clone(), free);
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn put_profile(&self, profile: ProfileRow) {
        self.tables
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile);
    }

    pub async fn put_plan(&self, plan: PlanRow) {
        self.tables.write().await.plans.insert(plan.id.clone(), plan);
    }

    pub async fn put_engine(&self, engine: EngineRow) {
        self.tables.write().await.engines.insert(engine.id, engine);
    }

    pub async fn put_api_key(&self, key: UserApiKeyRow) {
        self.tables.write().await.api_keys.push(key);
    }

    pub async fn put_storage_config(&self, config: UserStorageConfigRow) {
        self.tables
            .write()
            .await
            .storage_configs
            .insert(config.user_id.clone(), config);
    }

    /// All stored-file rows, in no particular order.
    pub async fn stored_files(&self) -> Vec<StoredFileRow> {
        self.tables.read().await.stored_files.values().cloned().collect()
    }
}

fn newest_first<T, F>(rows: &mut [T], created_at: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> DbResult<Option<ProfileRow>> {
        Ok(self.tables.read().await.profiles.get(user_id).cloned())
    }

    async fn get_plan(&self, plan_id: &str) -> DbResult<Option<PlanRow>> {
        Ok(self.tables.read().await.plans.get(plan_id).cloned())
    }

    async fn count_profiles(&self) -> DbResult<u64> {
        Ok(self.tables.read().await.profiles.len() as u64)
    }

    async fn list_profiles_by_storage(&self, limit: usize) -> DbResult<Vec<ProfileRow>> {
        let mut rows: Vec<ProfileRow> =
            self.tables.read().await.profiles.values().cloned().collect();
        rows.sort_by(|a, b| b.storage_used_bytes.cmp(&a.storage_used_bytes));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn increment_lines_used(&self, user_id: &str, lines: i64) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| DbError::not_found(format!("profile {}", user_id)))?;
        profile.lines_used_this_month += lines;
        Ok(())
    }

    async fn reset_monthly_usage(&self) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for profile in tables.profiles.values_mut() {
            if profile.lines_used_this_month != 0 {
                profile.lines_used_this_month = 0;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn daily_jobs_used(&self, user_id: &str) -> DbResult<i64> {
        let today = Utc::now().date_naive();
        let mut tables = self.tables.write().await;
        let Some(profile) = tables.profiles.get_mut(user_id) else {
            return Ok(0);
        };
        if profile.daily_jobs_reset_at != Some(today) {
            profile.daily_jobs_used = 0;
            profile.daily_jobs_reset_at = Some(today);
        }
        Ok(profile.daily_jobs_used)
    }

    async fn increment_daily_jobs(&self, user_id: &str) -> DbResult<()> {
        let today = Utc::now().date_naive();
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| DbError::not_found(format!("profile {}", user_id)))?;
        if profile.daily_jobs_reset_at != Some(today) {
            profile.daily_jobs_used = 0;
            profile.daily_jobs_reset_at = Some(today);
        }
        profile.daily_jobs_used += 1;
        Ok(())
    }

    async fn set_storage_used(&self, user_id: &str, bytes: i64) -> DbResult<()> {
        if let Some(profile) = self.tables.write().await.profiles.get_mut(user_id) {
            profile.storage_used_bytes = bytes.max(0);
        }
        Ok(())
    }

    async fn insert_project(&self, project: &ProjectRow) -> DbResult<ProjectRow> {
        let mut tables = self.tables.write().await;
        if tables.projects.contains_key(&project.id) {
            return Err(DbError::AlreadyExists(format!("project {}", project.id)));
        }
        tables.projects.insert(project.id.clone(), project.clone());
        Ok(project.clone())
    }

    async fn get_project(&self, id: &ProjectId) -> DbResult<Option<ProjectRow>> {
        Ok(self.tables.read().await.projects.get(id).cloned())
    }

    async fn get_project_for_user(
        &self,
        id: &ProjectId,
        user_id: &str,
    ) -> DbResult<Option<ProjectRow>> {
        Ok(self
            .tables
            .read()
            .await
            .projects
            .get(id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn list_projects(&self, user_id: &str) -> DbResult<Vec<ProjectRow>> {
        let mut rows: Vec<ProjectRow> = self
            .tables
            .read()
            .await
            .projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |p| p.created_at);
        Ok(rows)
    }

    async fn update_project(&self, id: &ProjectId, patch: &ProjectPatch) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .projects
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("project {}", id)))?;
        patch.apply(row);
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> DbResult<bool> {
        let mut tables = self.tables.write().await;
        let removed = tables.projects.remove(id).is_some();
        if removed {
            // Mirrors the ON DELETE CASCADE foreign keys.
            tables.jobs.retain(|_, j| &j.project_id != id);
            tables.subtitle_files.retain(|_, f| &f.project_id != id);
            tables
                .stored_files
                .retain(|_, f| f.project_id.as_ref() != Some(id));
        }
        Ok(removed)
    }

    async fn count_projects(&self) -> DbResult<u64> {
        Ok(self.tables.read().await.projects.len() as u64)
    }

    async fn insert_job(&self, job: &JobRow) -> DbResult<JobRow> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(DbError::AlreadyExists(format!("job {}", job.id)));
        }
        tables.jobs.insert(job.id.clone(), job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, id: &JobId) -> DbResult<Option<JobRow>> {
        Ok(self.tables.read().await.jobs.get(id).cloned())
    }

    async fn get_job_for_user(&self, id: &JobId, user_id: &str) -> DbResult<Option<JobRow>> {
        Ok(self
            .tables
            .read()
            .await
            .jobs
            .get(id)
            .filter(|j| j.user_id == user_id)
            .cloned())
    }

    async fn update_job(&self, id: &JobId, patch: &JobPatch) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .jobs
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("job {}", id)))?;
        patch.apply(row);
        Ok(())
    }

    async fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> DbResult<bool> {
        let mut tables = self.tables.write().await;
        let row = tables
            .jobs
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("job {}", id)))?;
        if !from.contains(&row.status) || !patch.allowed_from(row.status) {
            return Ok(false);
        }
        patch.apply(row);
        Ok(true)
    }

    async fn count_jobs(&self, kind: Option<JobKind>, statuses: &[JobStatus]) -> DbResult<u64> {
        Ok(self
            .tables
            .read()
            .await
            .jobs
            .values()
            .filter(|j| kind.map_or(true, |k| j.kind == k))
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .count() as u64)
    }

    async fn list_jobs_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<JobRow>> {
        let mut rows: Vec<JobRow> = self
            .tables
            .read()
            .await
            .jobs
            .values()
            .filter(|j| &j.project_id == project_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |j| j.created_at);
        Ok(rows)
    }

    async fn insert_subtitle_file(&self, file: &SubtitleFileRow) -> DbResult<SubtitleFileRow> {
        self.tables
            .write()
            .await
            .subtitle_files
            .insert(file.id.clone(), file.clone());
        Ok(file.clone())
    }

    async fn list_subtitle_files(&self, project_id: &ProjectId) -> DbResult<Vec<SubtitleFileRow>> {
        let mut rows: Vec<SubtitleFileRow> = self
            .tables
            .read()
            .await
            .subtitle_files
            .values()
            .filter(|f| &f.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.track_index);
        Ok(rows)
    }

    async fn get_subtitle_file(&self, id: &str) -> DbResult<Option<SubtitleFileRow>> {
        Ok(self.tables.read().await.subtitle_files.get(id).cloned())
    }

    async fn update_subtitle_file(&self, id: &str, patch: &SubtitleFilePatch) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .subtitle_files
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("subtitle file {}", id)))?;
        patch.apply(row);
        Ok(())
    }

    async fn insert_stored_file(&self, file: &StoredFileRow) -> DbResult<StoredFileRow> {
        self.tables
            .write()
            .await
            .stored_files
            .insert(file.id.clone(), file.clone());
        Ok(file.clone())
    }

    async fn list_stored_files(&self, query: &StoredFileQuery) -> DbResult<Vec<StoredFileRow>> {
        let mut rows: Vec<StoredFileRow> = self
            .tables
            .read()
            .await
            .stored_files
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        if query.oldest_first {
            rows.sort_by_key(|f| f.created_at);
        } else {
            newest_first(&mut rows, |f| f.created_at);
        }
        Ok(rows)
    }

    async fn list_expired_stored_files(&self, now: DateTime<Utc>) -> DbResult<Vec<StoredFileRow>> {
        let mut rows: Vec<StoredFileRow> = self
            .tables
            .read()
            .await
            .stored_files
            .values()
            .filter(|f| f.is_expired_at(now))
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.expires_at);
        Ok(rows)
    }

    async fn delete_stored_files(&self, ids: &[String]) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(ids
            .iter()
            .filter(|id| tables.stored_files.remove(id.as_str()).is_some())
            .count() as u64)
    }

    async fn update_stored_files_for_project(
        &self,
        project_id: &ProjectId,
        uploaded_to_user_storage: bool,
    ) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for file in tables
            .stored_files
            .values_mut()
            .filter(|f| f.project_id.as_ref() == Some(project_id))
        {
            file.uploaded_to_user_storage = uploaded_to_user_storage;
            touched += 1;
        }
        Ok(touched)
    }

    async fn list_glossary(&self, user_id: &str) -> DbResult<Vec<GlossaryTermRow>> {
        let mut rows: Vec<GlossaryTermRow> = self
            .tables
            .read()
            .await
            .glossary
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |t| t.created_at);
        Ok(rows)
    }

    async fn insert_glossary_term(&self, term: &GlossaryTermRow) -> DbResult<GlossaryTermRow> {
        self.tables.write().await.glossary.push(term.clone());
        Ok(term.clone())
    }

    async fn delete_glossary_term(&self, user_id: &str, id: &str) -> DbResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.glossary.len();
        tables
            .glossary
            .retain(|t| !(t.id == id && t.user_id == user_id));
        Ok(tables.glossary.len() < before)
    }

    async fn get_engine(&self, engine: EngineKind) -> DbResult<Option<EngineRow>> {
        Ok(self.tables.read().await.engines.get(&engine).cloned())
    }

    async fn list_user_api_keys(
        &self,
        user_id: &str,
        engine: EngineKind,
    ) -> DbResult<Vec<UserApiKeyRow>> {
        Ok(self
            .tables
            .read()
            .await
            .api_keys
            .iter()
            .filter(|k| k.user_id == user_id && k.engine == engine)
            .cloned()
            .collect())
    }

    async fn get_user_storage_config(
        &self,
        user_id: &str,
    ) -> DbResult<Option<UserStorageConfigRow>> {
        Ok(self.tables.read().await.storage_configs.get(user_id).cloned())
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

//! Typed partial updates.
//!
//! Only `Some` fields are sent, so a patch never clobbers columns it does
//! not name. `apply` performs the same merge for the in-memory store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use subx_models::{JobResult, JobStatus, MediaInfo, ProjectStatus, SubtitleStyle};

use crate::rows::{JobRow, ProjectRow, SubtitleFileRow};

const MAX_ERROR_LEN: usize = 500;

/// Truncate an error message for storage in a row.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_lines: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_style: Option<SubtitleStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProjectPatch {
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(ProjectStatus::Failed),
            error_message: Some(truncate_error(message)),
            ..Default::default()
        }
    }

    pub fn touch(mut self) -> Self {
        self.updated_at = Some(Utc::now());
        self
    }

    pub fn apply(&self, row: &mut ProjectRow) {
        if let Some(v) = &self.name {
            row.name = v.clone();
        }
        if let Some(v) = self.status {
            row.status = v;
        }
        if let Some(v) = &self.source_lang {
            row.source_lang = Some(v.clone());
        }
        if let Some(v) = &self.target_lang {
            row.target_lang = Some(v.clone());
        }
        if let Some(v) = &self.file_url {
            row.file_url = Some(v.clone());
        }
        if let Some(v) = self.file_size_bytes {
            row.file_size_bytes = Some(v);
        }
        if let Some(v) = self.duration_seconds {
            row.duration_seconds = Some(v);
        }
        if let Some(v) = &self.video_codec {
            row.video_codec = Some(v.clone());
        }
        if let Some(v) = &self.media_info {
            row.media_info = Some(v.clone());
        }
        if let Some(v) = self.total_lines {
            row.total_lines = v;
        }
        if let Some(v) = self.translated_lines {
            row.translated_lines = v;
        }
        if let Some(v) = &self.subtitle_style {
            row.subtitle_style = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            row.error_message = Some(v.clone());
        }
        row.updated_at = self.updated_at.unwrap_or_else(Utc::now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// `Some(None)` clears the column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<Option<String>>,
    #[serde(flatten)]
    pub result: JobResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress.min(100)),
            ..Default::default()
        }
    }

    /// Picked up by a worker.
    pub fn processing(attempt: u32) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            attempts: Some(attempt),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Put back in the queue after a retryable failure.
    pub fn requeued(message: &str) -> Self {
        Self {
            status: Some(JobStatus::Queued),
            error_message: Some(Some(truncate_error(message))),
            ..Default::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(Some(truncate_error(message))),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// A failed job sent back to the queue by an operator.
    pub fn retried() -> Self {
        Self {
            status: Some(JobStatus::Queued),
            progress: Some(0),
            error_message: Some(None),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn completed(result: JobResult) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            result,
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Whether a row in `current` may take this patch's status.
    pub fn allowed_from(&self, current: JobStatus) -> bool {
        self.status
            .map_or(true, |next| next == current || current.can_transition_to(next))
    }

    pub fn apply(&self, row: &mut JobRow) {
        if let Some(v) = self.status {
            row.status = v;
        }
        if let Some(v) = self.progress {
            row.progress = v;
        }
        if let Some(v) = self.attempts {
            row.attempts = v;
        }
        if let Some(v) = &self.error_message {
            row.error_message = v.clone();
        }
        let r = &self.result;
        if r.output_key.is_some() {
            row.result.output_key = r.output_key.clone();
        }
        if r.output_size_bytes.is_some() {
            row.result.output_size_bytes = r.output_size_bytes;
        }
        if r.translated_lines.is_some() {
            row.result.translated_lines = r.translated_lines;
        }
        if r.total_lines.is_some() {
            row.result.total_lines = r.total_lines;
        }
        if r.cost_usd.is_some() {
            row.result.cost_usd = r.cost_usd;
        }
        if r.duration_ms.is_some() {
            row.result.duration_ms = r.duration_ms;
        }
        if let Some(v) = self.started_at {
            row.started_at = Some(v);
        }
        if let Some(v) = self.completed_at {
            row.completed_at = Some(v);
        }
        row.updated_at = self.updated_at.unwrap_or_else(Utc::now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubtitleFilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SubtitleFilePatch {
    pub fn translated(key: impl Into<String>) -> Self {
        Self {
            translated_file_url: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn apply(&self, row: &mut SubtitleFileRow) {
        if let Some(v) = self.total_lines {
            row.total_lines = v;
        }
        if let Some(v) = &self.translated_file_url {
            row.translated_file_url = Some(v.clone());
        }
        if let Some(v) = &self.language {
            row.language = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subx_models::{JobKind, ProjectId};

    #[test]
    fn test_patch_skips_none() {
        let value = serde_json::to_value(ProjectPatch::status(ProjectStatus::Ready)).unwrap();
        assert_eq!(value, serde_json::json!({"status": "ready"}));

        let value = serde_json::to_value(JobPatch::progress(150)).unwrap();
        assert_eq!(value, serde_json::json!({"progress": 100}));
    }

    #[test]
    fn test_job_completed_serializes_result() {
        let patch = JobPatch::completed(JobResult {
            translated_lines: Some(12),
            total_lines: Some(12),
            ..Default::default()
        });
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["translated_lines"], 12);
        assert!(value.get("output_key").is_none());
    }

    #[test]
    fn test_job_apply_keeps_unset_fields() {
        let mut job = JobRow::new("u", ProjectId::from_string("p"), JobKind::Translate, None);
        JobPatch::processing(1).apply(&mut job);
        JobPatch::progress(40).apply(&mut job);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 40);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        JobPatch::requeued("timeout").apply(&mut job);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_failed_truncates_message() {
        let patch = JobPatch::failed(&"e".repeat(800));
        assert_eq!(patch.error_message.flatten().unwrap().len(), 500);
    }

    #[test]
    fn test_retried_clears_error() {
        let mut job = JobRow::new("u", ProjectId::from_string("p"), JobKind::Export, None);
        JobPatch::failed("ffmpeg exited").apply(&mut job);
        assert!(JobPatch::retried().allowed_from(job.status));

        JobPatch::retried().apply(&mut job);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.error_message.is_none());

        let body = serde_json::to_value(JobPatch::retried()).unwrap();
        assert!(body["error_message"].is_null());
        assert!(body.as_object().unwrap().contains_key("error_message"));
    }

    #[test]
    fn test_project_apply() {
        let mut project = ProjectRow::new("u", "p");
        ProjectPatch {
            total_lines: Some(300),
            ..ProjectPatch::status(ProjectStatus::Ready)
        }
        .apply(&mut project);
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.total_lines, 300);
        assert!(project.file_url.is_none());
    }
}

//! Job payloads carried on the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use subx_models::{ExportConfig, JobId, JobKind, ProjectId, TranslateConfig};

/// Dedup key for extracting a project's upload.
pub fn extract_key(project_id: &ProjectId) -> String {
    format!("extract:{}", project_id)
}

/// Dedup key for translating one track.
pub fn translate_key(project_id: &ProjectId, subtitle_file_id: &str) -> String {
    format!("translate:{}:{}", project_id, subtitle_file_id)
}

/// Dedup key for exporting a project.
pub fn export_key(project_id: &ProjectId) -> String {
    format!("export:{}", project_id)
}

/// Probe an upload and extract its subtitle tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTracksJob {
    pub job_id: JobId,
    pub user_id: String,
    pub project_id: ProjectId,
    /// Temporary object written by the presigned upload.
    pub upload_key: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

impl ExtractTracksJob {
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        project_id: ProjectId,
        upload_key: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            project_id,
            upload_key: upload_key.into(),
            file_name: file_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Translate one subtitle track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateSubtitlesJob {
    pub job_id: JobId,
    pub user_id: String,
    pub project_id: ProjectId,
    /// Carries the resolved API key.
    pub config: TranslateConfig,
    pub created_at: DateTime<Utc>,
}

impl TranslateSubtitlesJob {
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        project_id: ProjectId,
        config: TranslateConfig,
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            project_id,
            config,
            created_at: Utc::now(),
        }
    }
}

/// Burn in or mux the translated track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportVideoJob {
    pub job_id: JobId,
    pub user_id: String,
    pub project_id: ProjectId,
    pub config: ExportConfig,
    pub created_at: DateTime<Utc>,
}

impl ExportVideoJob {
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        project_id: ProjectId,
        config: ExportConfig,
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            project_id,
            config,
            created_at: Utc::now(),
        }
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    ExtractTracks(ExtractTracksJob),
    TranslateSubtitles(TranslateSubtitlesJob),
    ExportVideo(ExportVideoJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ExtractTracks(j) => &j.job_id,
            QueueJob::TranslateSubtitles(j) => &j.job_id,
            QueueJob::ExportVideo(j) => &j.job_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            QueueJob::ExtractTracks(j) => &j.user_id,
            QueueJob::TranslateSubtitles(j) => &j.user_id,
            QueueJob::ExportVideo(j) => &j.user_id,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            QueueJob::ExtractTracks(j) => &j.project_id,
            QueueJob::TranslateSubtitles(j) => &j.project_id,
            QueueJob::ExportVideo(j) => &j.project_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueJob::ExtractTracks(_) => JobKind::Extract,
            QueueJob::TranslateSubtitles(_) => JobKind::Translate,
            QueueJob::ExportVideo(_) => JobKind::Export,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ExtractTracks(j) => extract_key(&j.project_id),
            QueueJob::TranslateSubtitles(j) => {
                translate_key(&j.project_id, &j.config.subtitle_file_id)
            }
            QueueJob::ExportVideo(j) => export_key(&j.project_id),
        }
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            QueueJob::ExtractTracks(_) => 1,
            QueueJob::TranslateSubtitles(_) => 2,
            QueueJob::ExportVideo(_) => 1,
        }
    }
}

impl From<ExtractTracksJob> for QueueJob {
    fn from(job: ExtractTracksJob) -> Self {
        QueueJob::ExtractTracks(job)
    }
}

impl From<TranslateSubtitlesJob> for QueueJob {
    fn from(job: TranslateSubtitlesJob) -> Self {
        QueueJob::TranslateSubtitles(job)
    }
}

impl From<ExportVideoJob> for QueueJob {
    fn from(job: ExportVideoJob) -> Self {
        QueueJob::ExportVideo(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subx_models::EngineKind;

    fn translate_job() -> QueueJob {
        TranslateSubtitlesJob::new(
            JobId::from_string("j1"),
            "u1",
            ProjectId::from_string("p1"),
            TranslateConfig {
                subtitle_file_id: "sf1".into(),
                engine: EngineKind::DeepL,
                model_id: None,
                source_lang: "en".into(),
                target_lang: "tr".into(),
                context_enabled: true,
                glossary_enabled: false,
                api_key: Some("k".into()),
            },
        )
        .into()
    }

    #[test]
    fn test_tagged_wire_format() {
        let value = serde_json::to_value(translate_job()).unwrap();
        assert_eq!(value["type"], "translate_subtitles");
        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["config"]["api_key"], "k");

        let decoded: QueueJob = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.kind(), JobKind::Translate);
    }

    #[test]
    fn test_accessors() {
        let job = translate_job();
        assert_eq!(job.user_id(), "u1");
        assert_eq!(job.project_id().as_str(), "p1");
        assert_eq!(job.idempotency_key(), "translate:p1:sf1");
        assert_eq!(job.max_retries(), 2);

        let extract: QueueJob = ExtractTracksJob::new(
            JobId::new(),
            "u1",
            ProjectId::from_string("p1"),
            "uploads/x/movie.mkv",
            "movie.mkv",
        )
        .into();
        assert_eq!(extract.kind(), JobKind::Extract);
        assert_eq!(extract.idempotency_key(), "extract:p1");
        assert_eq!(extract.max_retries(), 1);

        let export: QueueJob =
            ExportVideoJob::new(JobId::new(), "u1", ProjectId::from_string("p1"), ExportConfig::default())
                .into();
        assert_eq!(export.idempotency_key(), export_key(&ProjectId::from_string("p1")));
        assert_eq!(export.max_retries(), 1);
    }
}

//! Job definitions shared by the API, queue and worker.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineKind, ExportMode, ModelError, Resolution, SubtitleStyle, VideoCodec};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Probe an upload and pull its subtitle tracks out.
    Extract,
    /// Translate one subtitle track.
    Translate,
    /// Render or mux the translated track into the video.
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Extract => "extract",
            JobKind::Translate => "translate",
            JobKind::Export => "export",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(JobKind::Extract),
            "translate" => Ok(JobKind::Translate),
            "export" => Ok(JobKind::Export),
            other => Err(ModelError::unknown("job kind", other)),
        }
    }
}

/// Job status as stored in the `jobs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Only queued and processing jobs may be cancelled by a user.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `processing -> queued` is the automatic retry path and
    /// `failed -> queued` a manual re-run.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Queued)
                | (Failed, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ModelError::unknown("job status", other)),
        }
    }
}

/// Parameters of a translate job, persisted in the job row's `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranslateConfig {
    pub subtitle_file_id: String,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default = "default_true")]
    pub context_enabled: bool,
    #[serde(default)]
    pub glossary_enabled: bool,
    /// Resolved at enqueue time; never returned to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub api_key: Option<String>,
}

impl TranslateConfig {
    /// Copy without the API key, for storing in the job row.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: None,
            ..self.clone()
        }
    }
}

/// Parameters of an export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportConfig {
    #[serde(default)]
    pub mode: ExportMode,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub video_codec: VideoCodec,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default)]
    pub include_watermark: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_text: Option<String>,
    #[serde(default = "default_true")]
    pub keep_audio_tracks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_style: Option<SubtitleStyle>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: ExportMode::default(),
            resolution: Resolution::default(),
            video_codec: VideoCodec::default(),
            audio_codec: default_audio_codec(),
            include_watermark: false,
            watermark_text: None,
            keep_audio_tracks: true,
            subtitle_style: None,
        }
    }
}

/// Outcome fields written to a job row on completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_lines: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_audio_codec() -> String {
    "copy".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Queued));

        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());

        assert!(JobStatus::Processing.is_cancellable());
        assert!(!JobStatus::Failed.is_cancellable());
    }

    #[test]
    fn test_job_status_parse() {
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_translate_config_defaults() {
        let cfg: TranslateConfig = serde_json::from_str(
            r#"{"subtitle_file_id":"sf-1","source_lang":"ja","target_lang":"tr"}"#,
        )
        .unwrap();
        assert_eq!(cfg.engine, EngineKind::OpenAi);
        assert!(cfg.context_enabled);
        assert!(!cfg.glossary_enabled);
    }

    #[test]
    fn test_translate_config_redacted_drops_key() {
        let cfg = TranslateConfig {
            subtitle_file_id: "sf".into(),
            engine: EngineKind::DeepL,
            model_id: None,
            source_lang: "en".into(),
            target_lang: "de".into(),
            context_enabled: true,
            glossary_enabled: false,
            api_key: Some("secret".into()),
        };
        let json = serde_json::to_string(&cfg.redacted()).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_export_config_defaults() {
        let cfg: ExportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, ExportMode::BurnIn);
        assert_eq!(cfg.video_codec, VideoCodec::Copy);
        assert_eq!(cfg.audio_codec, "copy");
        assert!(cfg.keep_audio_tracks);
    }
}

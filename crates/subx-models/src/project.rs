//! Projects, probed media info and subtitle tracks.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ModelError;

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Project lifecycle: upload → extract → translate → edit → export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Uploading,
    #[default]
    Processing,
    Ready,
    Translating,
    Translated,
    Editing,
    Exporting,
    Exported,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Uploading => "uploading",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Translating => "translating",
            ProjectStatus::Translated => "translated",
            ProjectStatus::Editing => "editing",
            ProjectStatus::Exporting => "exporting",
            ProjectStatus::Exported => "exported",
            ProjectStatus::Failed => "failed",
        }
    }

    /// A worker currently owns the project's files.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Processing | ProjectStatus::Translating | ProjectStatus::Exporting
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(ProjectStatus::Uploading),
            "processing" => Ok(ProjectStatus::Processing),
            "ready" => Ok(ProjectStatus::Ready),
            "translating" => Ok(ProjectStatus::Translating),
            "translated" => Ok(ProjectStatus::Translated),
            "editing" => Ok(ProjectStatus::Editing),
            "exporting" => Ok(ProjectStatus::Exporting),
            "exported" => Ok(ProjectStatus::Exported),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(ModelError::unknown("project status", other)),
        }
    }
}

/// One subtitle stream inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Track {
    /// Absolute stream index in the container.
    pub index: u32,
    /// Position among subtitle streams, as used in `-map 0:s:{stream_index}`.
    pub stream_index: u32,
    pub codec: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Track {
    /// Codecs that are extracted as ASS rather than converted to SRT.
    pub fn is_styled(&self) -> bool {
        matches!(self.codec.as_str(), "ass" | "ssa")
    }

    pub fn has_known_language(&self) -> bool {
        !self.language.is_empty() && self.language != "und"
    }
}

/// An audio stream summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioTrack {
    pub index: u32,
    pub stream_index: u32,
    pub codec: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub channels: u32,
}

/// Probe summary stored on the project row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub file_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub subtitle_streams: Vec<Track>,
}

impl MediaInfo {
    /// Language of the first subtitle track that declares one.
    pub fn detected_language(&self) -> Option<&str> {
        self.subtitle_streams
            .iter()
            .find(|t| t.has_known_language())
            .map(|t| t.language.as_str())
    }
}

fn default_language() -> String {
    "und".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(position: u32, lang: &str, codec: &str) -> Track {
        Track {
            index: position + 2,
            stream_index: position,
            codec: codec.to_string(),
            language: lang.to_string(),
            title: None,
        }
    }

    #[test]
    fn test_detected_language_skips_undetermined() {
        let info = MediaInfo {
            subtitle_streams: vec![track(0, "und", "subrip"), track(1, "jpn", "ass")],
            ..Default::default()
        };
        assert_eq!(info.detected_language(), Some("jpn"));
        assert!(info.subtitle_streams[1].is_styled());
        assert!(!info.subtitle_streams[0].is_styled());
    }

    #[test]
    fn test_track_language_default() {
        let t: Track =
            serde_json::from_str(r#"{"index":0,"stream_index":2,"codec":"subrip"}"#).unwrap();
        assert_eq!(t.language, "und");
    }

    #[test]
    fn test_project_status_busy() {
        assert!(ProjectStatus::Exporting.is_busy());
        assert!(!ProjectStatus::Translated.is_busy());
        assert_eq!("editing".parse::<ProjectStatus>().unwrap(), ProjectStatus::Editing);
    }
}

//! Subtitle file formats.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Ass,
    Ssa,
    Vtt,
}

impl SubtitleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Ass => "ass",
            SubtitleFormat::Ssa => "ssa",
            SubtitleFormat::Vtt => "vtt",
        }
    }

    /// Detect from an extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.trim_start_matches('.').parse().ok()
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// ASS and SSA share the styled event model.
    pub fn is_styled(&self) -> bool {
        matches!(self, SubtitleFormat::Ass | SubtitleFormat::Ssa)
    }

    /// Format a translated copy is written in: styled input stays ASS, everything else SRT.
    pub fn translated_output(&self) -> Self {
        if self.is_styled() {
            SubtitleFormat::Ass
        } else {
            SubtitleFormat::Srt
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtitleFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srt" | "subrip" => Ok(SubtitleFormat::Srt),
            "ass" => Ok(SubtitleFormat::Ass),
            "ssa" => Ok(SubtitleFormat::Ssa),
            "vtt" | "webvtt" => Ok(SubtitleFormat::Vtt),
            other => Err(ModelError::unknown("subtitle format", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(SubtitleFormat::from_extension(".SRT"), Some(SubtitleFormat::Srt));
        assert_eq!(SubtitleFormat::from_extension("ssa"), Some(SubtitleFormat::Ssa));
        assert_eq!(SubtitleFormat::from_extension("mkv"), None);
        assert_eq!(
            SubtitleFormat::from_path(Path::new("/tmp/a/sub_0_jpn.ass")),
            Some(SubtitleFormat::Ass)
        );
    }

    #[test]
    fn test_translated_output_format() {
        assert_eq!(SubtitleFormat::Ssa.translated_output(), SubtitleFormat::Ass);
        assert_eq!(SubtitleFormat::Vtt.translated_output(), SubtitleFormat::Srt);
    }
}

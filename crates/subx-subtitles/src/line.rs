//! A single subtitle cue.

use serde::{Deserialize, Serialize};

/// One cue, numbered from 1 in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleLine {
    pub line_number: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Plain text; line breaks are `\n`.
    pub text: String,
    /// ASS style name for styled sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl SubtitleLine {
    pub fn new(line_number: u32, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            line_number,
            start_ms,
            end_ms,
            text: text.into(),
            style: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Same timing, different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}

/// Total characters across all cues.
pub fn total_chars<S: AsRef<str>>(texts: &[S]) -> usize {
    texts.iter().map(|t| t.as_ref().chars().count()).sum()
}

//! Subtitle styling as edited in the style editor.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Style applied when burning subtitles or writing an ASS file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SubtitleStyle {
    pub font_family: String,
    pub font_size: u32,
    /// `#RRGGBB`
    pub color: String,
    pub outline: u32,
    pub shadow: u32,
    pub bold: bool,
    pub italic: bool,
    /// ASS numpad alignment (2 = bottom centre).
    pub alignment: u8,
    pub margin_v: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_color: Option<String>,
    /// Opaque box behind the text when above zero (0.0 - 1.0).
    pub bg_opacity: f32,
    pub letter_spacing: f32,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size: 48,
            color: "#FFFFFF".to_string(),
            outline: 2,
            shadow: 1,
            bold: false,
            italic: false,
            alignment: 2,
            margin_v: 30,
            outline_color: None,
            shadow_color: None,
            bg_opacity: 0.0,
            letter_spacing: 0.0,
        }
    }
}

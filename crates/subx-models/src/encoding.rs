//! Export encoding settings.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// How subtitles end up in the exported file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Rendered into the video frames.
    #[default]
    BurnIn,
    /// Attached as a selectable subtitle stream.
    SoftSub,
}

/// Requested video codec for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
    #[default]
    Copy,
}

impl VideoCodec {
    /// ffmpeg encoder name.
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libaom-av1",
            VideoCodec::Copy => "copy",
        }
    }
}

/// Output resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "4k")]
    P2160,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Original => "original",
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::P1440 => "1440p",
            Resolution::P2160 => "4k",
        }
    }

    /// Target frame size, `None` for the source size.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::P480 => Some((854, 480)),
            Resolution::P720 => Some((1280, 720)),
            Resolution::P1080 => Some((1920, 1080)),
            Resolution::P1440 => Some((2560, 1440)),
            Resolution::P2160 => Some((3840, 2160)),
        }
    }

    /// Ordering used for plan limits. `Original` ranks highest since it is unbounded.
    pub fn rank(&self) -> u8 {
        match self {
            Resolution::P480 => 1,
            Resolution::P720 => 2,
            Resolution::P1080 => 3,
            Resolution::P1440 => 4,
            Resolution::P2160 => 5,
            Resolution::Original => 6,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(Resolution::Original),
            "480p" => Ok(Resolution::P480),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "1440p" => Ok(Resolution::P1440),
            "4k" | "2160p" => Ok(Resolution::P2160),
            other => Err(ModelError::unknown("resolution", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_encoder_names() {
        assert_eq!(VideoCodec::H264.encoder(), "libx264");
        assert_eq!(VideoCodec::Vp9.encoder(), "libvpx-vp9");
        assert_eq!(VideoCodec::Av1.encoder(), "libaom-av1");
    }

    #[test]
    fn test_resolution_rank_and_parse() {
        assert!(Resolution::P720.rank() < Resolution::P1080.rank());
        assert!(Resolution::P2160.rank() < Resolution::Original.rank());
        assert_eq!("4K".parse::<Resolution>().unwrap(), Resolution::P2160);
        assert_eq!(Resolution::P1080.dimensions(), Some((1920, 1080)));
        assert_eq!(Resolution::Original.dimensions(), None);
        let r: Resolution = serde_json::from_str("\"720p\"").unwrap();
        assert_eq!(r, Resolution::P720);
    }
}

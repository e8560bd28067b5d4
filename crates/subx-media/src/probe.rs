//! FFprobe media information.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use subx_models::{AudioTrack, MediaInfo, Track};
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Probe a media file.
///
/// Subtitle and audio streams are numbered by position within their type,
/// which is what `-map 0:s:N` expects.
pub async fn probe(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).chars().take(500).collect()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let duration_seconds = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let file_size_bytes = probe
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let video = probe.streams.iter().find(|s| s.is("video"));

    let audio_tracks = probe
        .streams
        .iter()
        .filter(|s| s.is("audio"))
        .enumerate()
        .map(|(i, s)| AudioTrack {
            index: s.index,
            stream_index: i as u32,
            codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
            language: s.tag("language").unwrap_or("und").to_string(),
            channels: s.channels.unwrap_or(2),
        })
        .collect();

    let subtitle_streams = probe
        .streams
        .iter()
        .filter(|s| s.is("subtitle"))
        .enumerate()
        .map(|(i, s)| Track {
            index: s.index,
            stream_index: i as u32,
            codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
            language: s.tag("language").unwrap_or("und").to_string(),
            title: s.tag("title").map(str::to_string),
        })
        .collect();

    Ok(MediaInfo {
        duration_seconds,
        file_size_bytes,
        video_codec: video.and_then(|v| v.codec_name.clone()),
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        audio_tracks,
        subtitle_streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 6, "tags": {"language": "jpn"}},
            {"index": 2, "codec_type": "subtitle", "codec_name": "ass", "tags": {"language": "eng", "title": "Full"}},
            {"index": 3, "codec_type": "subtitle", "codec_name": "subrip"},
            {"index": 4, "codec_type": "attachment", "codec_name": "ttf"}
        ],
        "format": {"duration": "1425.376000", "size": "734003200"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert!((info.duration_seconds - 1425.376).abs() < 0.001);
        assert_eq!(info.file_size_bytes, 734_003_200);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!((info.width, info.height), (1920, 1080));

        assert_eq!(info.audio_tracks.len(), 1);
        assert_eq!(info.audio_tracks[0].channels, 6);

        assert_eq!(info.subtitle_streams.len(), 2);
        let first = &info.subtitle_streams[0];
        assert_eq!((first.index, first.stream_index), (2, 0));
        assert_eq!(first.language, "eng");
        assert_eq!(first.title.as_deref(), Some("Full"));
        let second = &info.subtitle_streams[1];
        assert_eq!(second.stream_index, 1);
        assert_eq!(second.language, "und");
        assert_eq!(second.title, None);
    }

    #[test]
    fn test_parse_probe_output_without_streams() {
        let info = parse_probe_output(br#"{"format": {}}"#).unwrap();
        assert_eq!(info.duration_seconds, 0.0);
        assert!(info.subtitle_streams.is_empty());
        assert!(info.video_codec.is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe("/definitely/not/here.mkv").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

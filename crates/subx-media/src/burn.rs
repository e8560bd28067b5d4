//! Subtitle burn-in.

use std::path::{Path, PathBuf};

use subx_models::{Resolution, SubtitleStyle, VideoCodec};
use subx_subtitles::hex_to_ass_color;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe;

/// Burn-in encode timeout (2 hours).
pub const BURN_TIMEOUT_SECS: u64 = 7200;

/// Watermark opacity used in the drawtext filter.
const WATERMARK_OPACITY: f32 = 0.3;

/// Everything needed to render subtitles into a video.
#[derive(Debug, Clone)]
pub struct BurnRequest {
    pub input: PathBuf,
    pub subtitle: PathBuf,
    pub output: PathBuf,
    pub style: Option<SubtitleStyle>,
    pub resolution: Resolution,
    pub video_codec: VideoCodec,
    pub audio_codec: String,
    pub watermark: Option<String>,
    /// Source duration for progress; probed when zero
    pub duration_ms: i64,
}

impl BurnRequest {
    pub fn new(
        input: impl AsRef<Path>,
        subtitle: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            subtitle: subtitle.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            style: None,
            resolution: Resolution::Original,
            video_codec: VideoCodec::H264,
            audio_codec: "copy".to_string(),
            watermark: None,
            duration_ms: 0,
        }
    }

    /// Video codec actually used. Filters require re-encoding, so `copy` becomes H.264.
    pub fn effective_codec(&self) -> VideoCodec {
        match self.video_codec {
            VideoCodec::Copy => VideoCodec::H264,
            other => other,
        }
    }
}

/// Escape a path for use inside a quoted filter argument.
///
/// Backslashes become forward slashes and a drive-letter colon is escaped,
/// so Windows paths survive the filter parser.
pub fn escape_filter_path(path: &Path) -> String {
    let mut escaped = path.to_string_lossy().replace('\\', "/");
    if escaped.as_bytes().get(1) == Some(&b':') {
        escaped = format!("{}\\:{}", &escaped[..1], &escaped[2..]);
    }
    escaped.replace('\'', "'\\''")
}

/// `&HAABBGGRR&` as the subtitles filter expects.
fn ass_color(hex: &str) -> String {
    format!("{}&", hex_to_ass_color(hex))
}

fn escape_drawtext(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\'' && *c != '\\')
        .flat_map(|c| match c {
            ':' | '%' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

/// `force_style` for the `subtitles` filter from editor settings.
pub fn build_force_style(style: &SubtitleStyle) -> String {
    let mut parts = Vec::new();

    let font = style.font_family.replace(['\'', ',', '='], "");
    if !font.is_empty() {
        parts.push(format!("FontName={}", font));
    }
    if style.font_size > 0 {
        parts.push(format!("FontSize={}", style.font_size));
    }
    parts.push(format!("PrimaryColour={}", ass_color(&style.color)));
    if style.bold {
        parts.push("Bold=1".to_string());
    }
    if style.italic {
        parts.push("Italic=1".to_string());
    }
    parts.push(format!("Outline={}", style.outline));
    if let Some(color) = &style.outline_color {
        parts.push(format!("OutlineColour={}", ass_color(color)));
    }
    parts.push(format!("Shadow={}", style.shadow));
    parts.push(format!("Alignment={}", style.alignment));
    parts.push(format!("MarginV={}", style.margin_v));

    // An opaque box wins over a shadow colour
    if style.bg_opacity > 0.0 {
        parts.push("BorderStyle=3".to_string());
        let alpha = ((1.0 - style.bg_opacity.min(1.0)) * 255.0) as u8;
        parts.push(format!("BackColour=&H{:02X}000000&", alpha));
    } else if let Some(color) = &style.shadow_color {
        parts.push(format!("BackColour={}", ass_color(color)));
    }
    parts.push(format!("Spacing={}", style.letter_spacing));

    parts.join(",")
}

/// Build the `-vf` chain: optional scale/pad, subtitles, optional watermark.
pub fn build_burn_filter(
    subtitle_path: &Path,
    style: Option<&SubtitleStyle>,
    resolution: Resolution,
    watermark: Option<&str>,
) -> String {
    let escaped = escape_filter_path(subtitle_path);
    let is_ass = subtitle_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ass") || e.eq_ignore_ascii_case("ssa"));

    let mut filters = Vec::new();

    if let Some((w, h)) = resolution.dimensions() {
        filters.push(format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
        ));
    }

    // ASS files carry their own styling
    if is_ass {
        filters.push(format!("ass='{}'", escaped));
    } else {
        match style.map(build_force_style).filter(|s| !s.is_empty()) {
            Some(force) => filters.push(format!("subtitles='{}':force_style='{}'", escaped, force)),
            None => filters.push(format!("subtitles='{}'", escaped)),
        }
    }

    if let Some(text) = watermark.map(str::trim).filter(|t| !t.is_empty()) {
        filters.push(format!(
            "drawtext=text='{}':fontsize=24:fontcolor=white@{}:x=w-tw-20:y=h-th-20",
            escape_drawtext(text),
            WATERMARK_OPACITY
        ));
    }

    filters.join(",")
}

fn encoder_args(codec: VideoCodec) -> Vec<String> {
    let mut args = vec!["-c:v".to_string(), codec.encoder().to_string()];
    let extra: &[&str] = match codec {
        VideoCodec::H264 => &["-preset", "medium", "-crf", "23"],
        VideoCodec::H265 => &["-preset", "medium", "-crf", "28"],
        VideoCodec::Vp9 => &["-b:v", "0", "-crf", "30"],
        VideoCodec::Av1 | VideoCodec::Copy => &[],
    };
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

/// Render subtitles into the video.
///
/// `on_progress` receives whole percentages; 100 is only sent when ffmpeg
/// reports the end of the stream.
pub async fn burn_subtitles<F>(
    request: &BurnRequest,
    on_progress: F,
    cancel: Option<watch::Receiver<bool>>,
) -> MediaResult<()>
where
    F: Fn(u8) + Send + 'static,
{
    let codec = request.effective_codec();
    if request.video_codec == VideoCodec::Copy {
        warn!("copy codec overridden to libx264 for burn-in");
    }

    let total_ms = if request.duration_ms > 0 {
        request.duration_ms
    } else {
        match probe(&request.input).await {
            Ok(info) => (info.duration_seconds * 1000.0) as i64,
            Err(e) => {
                warn!(error = %e, "Could not probe duration; progress will not be reported");
                0
            }
        }
    };

    let filter = build_burn_filter(
        &request.subtitle,
        request.style.as_ref(),
        request.resolution,
        request.watermark.as_deref(),
    );

    let cmd = FfmpegCommand::new(&request.input, &request.output)
        .log_level("warning")
        .video_filter(filter)
        .output_args(encoder_args(codec))
        .audio_codec(request.audio_codec.clone())
        .output_args(["-movflags", "+faststart"]);

    info!(
        input = %request.input.display(),
        codec = codec.encoder(),
        resolution = %request.resolution,
        "Starting subtitle burn-in"
    );

    let mut runner = FfmpegRunner::new().with_timeout(BURN_TIMEOUT_SECS);
    if let Some(rx) = cancel {
        runner = runner.with_cancel(rx);
    }

    runner
        .run_with_progress(&cmd, move |p| {
            if p.is_complete {
                on_progress(100);
            } else if total_ms > 0 {
                on_progress(p.percentage(total_ms));
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("/tmp/job/sub.srt")), "/tmp/job/sub.srt");
        assert_eq!(
            escape_filter_path(Path::new("C:\\work\\sub.srt")),
            "C\\:/work/sub.srt"
        );
        assert_eq!(escape_filter_path(Path::new("/tmp/it's.srt")), "/tmp/it'\\''s.srt");
    }

    #[test]
    fn test_filter_for_ass_ignores_style() {
        let style = SubtitleStyle::default();
        let vf = build_burn_filter(Path::new("/w/t.ass"), Some(&style), Resolution::Original, None);
        assert_eq!(vf, "ass='/w/t.ass'");
    }

    #[test]
    fn test_filter_with_scale_style_and_watermark() {
        let style = SubtitleStyle {
            bold: true,
            bg_opacity: 0.5,
            ..Default::default()
        };
        let vf = build_burn_filter(
            Path::new("/w/t.srt"),
            Some(&style),
            Resolution::P720,
            Some("SubTranslate"),
        );
        assert!(vf.starts_with(
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2,"
        ));
        assert!(vf.contains("subtitles='/w/t.srt':force_style='FontName=Arial,FontSize=48,PrimaryColour=&H00FFFFFF&,Bold=1,"));
        assert!(vf.contains("BorderStyle=3,BackColour=&H7F000000&"));
        assert!(vf.ends_with(
            "drawtext=text='SubTranslate':fontsize=24:fontcolor=white@0.3:x=w-tw-20:y=h-th-20"
        ));
    }

    #[test]
    fn test_filter_without_style() {
        let vf = build_burn_filter(Path::new("/w/t.srt"), None, Resolution::Original, Some("  "));
        assert_eq!(vf, "subtitles='/w/t.srt'");
    }

    #[test]
    fn test_force_style_shadow_color_fallback() {
        let style = SubtitleStyle {
            shadow_color: Some("#102030".to_string()),
            outline_color: Some("#000000".to_string()),
            ..Default::default()
        };
        let fs = build_force_style(&style);
        assert!(fs.contains("OutlineColour=&H00000000&"));
        assert!(fs.contains("BackColour=&H00302010&"));
        assert!(!fs.contains("BorderStyle"));
    }

    #[test]
    fn test_drawtext_escaping() {
        assert_eq!(escape_drawtext("a:b 50% it's"), "a\\:b 50\\% its");
    }

    #[test]
    fn test_encoder_args_and_copy_override() {
        assert_eq!(
            encoder_args(VideoCodec::H265),
            vec!["-c:v", "libx265", "-preset", "medium", "-crf", "28"]
        );
        assert_eq!(
            encoder_args(VideoCodec::Vp9),
            vec!["-c:v", "libvpx-vp9", "-b:v", "0", "-crf", "30"]
        );
        let mut req = BurnRequest::new("in.mkv", "s.srt", "out.mp4");
        req.video_codec = VideoCodec::Copy;
        assert_eq!(req.effective_codec(), VideoCodec::H264);
    }
}

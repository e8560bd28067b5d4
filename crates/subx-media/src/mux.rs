//! Soft-sub muxing.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Mux timeout (1 hour).
pub const MUX_TIMEOUT_SECS: u64 = 3600;

/// Attach a subtitle file as a new default stream.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub input: PathBuf,
    pub subtitle: PathBuf,
    pub output: PathBuf,
    /// ISO 639 code written to the stream metadata
    pub language: String,
    pub title: String,
    /// Keep every audio track, or only the first
    pub keep_audio_tracks: bool,
}

/// Subtitle codec the output container can hold.
fn subtitle_codec_for(output: &Path) -> &'static str {
    match output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") | Some("mov") => "mov_text",
        Some("webm") => "webvtt",
        _ => "srt",
    }
}

pub(crate) fn build_mux_command(request: &MuxRequest) -> FfmpegCommand {
    let audio_map = if request.keep_audio_tracks {
        "0:a?"
    } else {
        "0:a:0?"
    };

    FfmpegCommand::new(&request.input, &request.output)
        .log_level("warning")
        .add_input(&request.subtitle)
        .map("0:v")
        .map(audio_map)
        .map("1:0")
        .output_args(["-c", "copy"])
        .subtitle_codec(subtitle_codec_for(&request.output))
        .metadata("s:s:0", "language", &request.language)
        .metadata("s:s:0", "title", &request.title)
        .disposition("s:0", "default")
}

/// Copy video and audio, adding the subtitle as the only subtitle stream.
pub async fn mux_soft_subtitles(
    request: &MuxRequest,
    cancel: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    let cmd = build_mux_command(request);

    info!(
        input = %request.input.display(),
        language = %request.language,
        "Muxing soft subtitles"
    );

    let mut runner = FfmpegRunner::new().with_timeout(MUX_TIMEOUT_SECS);
    if let Some(rx) = cancel {
        runner = runner.with_cancel(rx);
    }
    runner.run(&cmd).await
}

//! Subtitle track extraction.

use std::path::{Path, PathBuf};

use subx_models::{SubtitleFormat, Track};
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Per-track extraction timeout.
const EXTRACT_TIMEOUT_SECS: u64 = 300;

/// Result of extracting one track. Failures do not abort the other tracks.
#[derive(Debug, Clone)]
pub struct ExtractedTrack {
    pub track: Track,
    pub format: SubtitleFormat,
    /// Set when extraction succeeded
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl ExtractedTrack {
    pub fn extracted(&self) -> bool {
        self.path.is_some()
    }

    /// `sub_{position}_{language}.{ext}`
    pub fn file_name(&self) -> String {
        output_file_name(&self.track, self.format)
    }
}

fn output_file_name(track: &Track, format: SubtitleFormat) -> String {
    format!("sub_{}_{}.{}", track.stream_index, track.language, format.as_str())
}

/// Extract every listed track from `input` into `out_dir`.
///
/// Styled tracks (ASS/SSA) stay ASS; everything else is converted to SRT.
pub async fn extract_subtitle_tracks(
    input: impl AsRef<Path>,
    tracks: &[Track],
    out_dir: impl AsRef<Path>,
) -> MediaResult<Vec<ExtractedTrack>> {
    let input = input.as_ref();
    let out_dir = out_dir.as_ref();
    tokio::fs::create_dir_all(out_dir).await?;

    let runner = FfmpegRunner::new().with_timeout(EXTRACT_TIMEOUT_SECS);
    let mut results = Vec::with_capacity(tracks.len());

    for track in tracks {
        let format = if track.is_styled() {
            SubtitleFormat::Ass
        } else {
            SubtitleFormat::Srt
        };
        let out_path = out_dir.join(output_file_name(track, format));

        let cmd = FfmpegCommand::new(input, &out_path)
            .log_level("warning")
            .map(format!("0:s:{}", track.stream_index))
            .subtitle_codec(format.as_str());

        match runner.run(&cmd).await {
            Ok(()) => {
                info!(
                    stream_index = track.stream_index,
                    language = %track.language,
                    "Extracted subtitle track"
                );
                results.push(ExtractedTrack {
                    track: track.clone(),
                    format,
                    path: Some(out_path),
                    error: None,
                });
            }
            Err(e) => {
                warn!(
                    stream_index = track.stream_index,
                    error = %e,
                    "Skipping subtitle track that failed to extract"
                );
                results.push(ExtractedTrack {
                    track: track.clone(),
                    format,
                    path: None,
                    error: Some(e.summary()),
                });
            }
        }
    }

    Ok(results)
}

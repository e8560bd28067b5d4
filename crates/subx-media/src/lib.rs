//! FFmpeg CLI wrapper for the subtitle pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - ffprobe media inspection
//! - Subtitle track extraction, burn-in and soft-sub muxing

pub mod burn;
pub mod command;
pub mod error;
pub mod extract;
pub mod mux;
pub mod probe;
pub mod progress;

pub use burn::{build_burn_filter, build_force_style, burn_subtitles, escape_filter_path, BurnRequest};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use extract::{extract_subtitle_tracks, ExtractedTrack};
pub use mux::{mux_soft_subtitles, MuxRequest};
pub use probe::probe;
pub use progress::{FfmpegProgress, ProgressCallback};

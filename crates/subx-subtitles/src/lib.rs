//! Subtitle parsing, writing and chunking.
//!
//! This crate provides:
//! - Parsers for SRT, WebVTT and ASS/SSA into [`SubtitleLine`]s
//! - SRT and ASS writers (ASS with a style derived from [`SubtitleStyle`])
//! - Sliding-window chunking for translation requests
//! - Glossary marker handling
//!
//! [`SubtitleStyle`]: subx_models::SubtitleStyle

pub mod chunk;
pub mod error;
pub mod glossary;
pub mod line;
pub mod parse;
pub mod time;
pub mod write;

pub use chunk::{chunk_lines, Chunk};
pub use error::{SubtitleError, SubtitleResult};
pub use glossary::{apply_glossary_post, apply_glossary_pre, Glossary};
pub use line::SubtitleLine;
pub use parse::{decode_text, parse_bytes, parse_file, parse_str};
pub use time::{format_ass_time, format_srt_time, parse_srt_time};
pub use write::{hex_to_ass_color, hex_to_rgba, write_ass, write_srt, write_subtitles};

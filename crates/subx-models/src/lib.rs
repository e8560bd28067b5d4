//! Shared data models for the SubTranslate backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their kinds and the job status state machine
//! - Projects, tracks and probed media info
//! - Export settings (mode, codec, resolution) and subtitle styling
//! - Subscription plans and stored-file bookkeeping

pub mod encoding;
pub mod engine;
pub mod error;
pub mod job;
pub mod plan;
pub mod project;
pub mod storage;
pub mod style;
pub mod subtitle;

pub use encoding::{ExportMode, Resolution, VideoCodec};
pub use engine::EngineKind;
pub use error::ModelError;
pub use job::{ExportConfig, JobId, JobKind, JobResult, JobStatus, TranslateConfig};
pub use plan::Plan;
pub use project::{AudioTrack, MediaInfo, ProjectId, ProjectStatus, Track};
pub use storage::{FileType, StorageProvider};
pub use style::SubtitleStyle;
pub use subtitle::SubtitleFormat;

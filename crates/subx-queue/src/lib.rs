//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing with idempotency-key dedup
//! - Worker consumption with retry counters and a DLQ
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{
    export_key, extract_key, translate_key, ExportVideoJob, ExtractTracksJob, QueueJob,
    TranslateSubtitlesJob,
};
pub use progress::{ProgressChannel, ProgressEvent, ProgressStream};
pub use queue::{JobQueue, QueueConfig};

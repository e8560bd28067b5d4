//! Subtitle worker.
//!
//! This crate provides:
//! - Job executor for extract, translate and export jobs
//! - Storage accounting and expired-file cleanup (shared with the API)
//! - The maintenance scheduler
//! - Progress emission and graceful shutdown

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod scheduler;

pub use config::WorkerConfig;
pub use context::{EngineFactory, ProcessingContext};
pub use error::{WorkerError, WorkerResult};
pub use executor::{decide_failure, run_attempt, FailureAction, JobExecutor};
pub use logging::JobLogger;
pub use retry::{retry_async, RetryConfig, RetryResult};

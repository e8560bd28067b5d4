//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent FFmpeg processes across jobs
    pub max_ffmpeg_processes: usize,
    /// Hard limit on a single job
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How often the worker scans for orphaned pending jobs
    pub claim_interval: Duration,
    /// First delay before a failed job is put back on the stream
    pub retry_backoff: Duration,
    /// How often expired stored files are removed
    pub cleanup_interval: Duration,
    /// How often an export checks its job row for cancellation
    pub cancel_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_ffmpeg_processes: 2,
            job_timeout: Duration::from_secs(7200),
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/subx"),
            claim_interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(1800),
            cancel_poll_interval: Duration::from_secs(3),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)
                .max(1),
            max_ffmpeg_processes: env_parse("WORKER_MAX_FFMPEG", defaults.max_ffmpeg_processes).max(1),
            job_timeout: Duration::from_secs(env_parse("WORKER_JOB_TIMEOUT_SECS", 7200)),
            shutdown_timeout: Duration::from_secs(env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS", 60)),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            claim_interval: Duration::from_secs(env_parse("WORKER_CLAIM_INTERVAL_SECS", 30)),
            retry_backoff: Duration::from_secs(env_parse("WORKER_RETRY_BACKOFF_SECS", 5)),
            cleanup_interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 1800)),
            cancel_poll_interval: defaults.cancel_poll_interval,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at one minute.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_secs(60))
    }
}

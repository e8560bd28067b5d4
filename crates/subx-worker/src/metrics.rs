//! Worker metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "subx_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "subx_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "subx_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "subx_jobs_retried_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "subx_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "subx_job_duration_seconds";
    pub const LINES_TRANSLATED_TOTAL: &str = "subx_lines_translated_total";
    pub const FILES_CLEANED_TOTAL: &str = "subx_cleanup_files_deleted_total";
}

pub fn record_job_started(kind: &str) {
    counter!(names::JOBS_STARTED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_completed(kind: &str, duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL, "kind" => kind.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind.to_string()).record(duration_secs);
}

pub fn record_job_failed(kind: &str) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_retried(kind: &str) {
    counter!(names::JOBS_RETRIED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_cancelled(kind: &str) {
    counter!(names::JOBS_CANCELLED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_lines_translated(engine: &str, lines: u64) {
    counter!(names::LINES_TRANSLATED_TOTAL, "engine" => engine.to_string()).increment(lines);
}

pub fn record_files_cleaned(count: u64) {
    counter!(names::FILES_CLEANED_TOTAL).increment(count);
}

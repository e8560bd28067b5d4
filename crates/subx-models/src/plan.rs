//! Subscription plans and their quotas.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Resolution;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// A row of `subscription_plans`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `-1` means unlimited.
    #[serde(default = "default_lines_per_month")]
    pub lines_per_month: i64,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_max_resolution")]
    pub max_export_resolution: Resolution,
    #[serde(default)]
    pub watermark_required: bool,
    #[serde(default = "default_daily_job_limit")]
    pub daily_job_limit: i64,
    #[serde(default)]
    pub can_use_system_keys: bool,
}

impl Plan {
    /// The fallback free tier, used when a profile points at a missing plan.
    pub fn free() -> Self {
        Self {
            id: "free".to_string(),
            name: "Free".to_string(),
            lines_per_month: default_lines_per_month(),
            storage_gb: default_storage_gb(),
            retention_days: default_retention_days(),
            max_export_resolution: default_max_resolution(),
            watermark_required: true,
            daily_job_limit: default_daily_job_limit(),
            can_use_system_keys: false,
        }
    }

    pub fn is_unlimited_lines(&self) -> bool {
        self.lines_per_month < 0
    }

    /// Whether `requested` more lines fit on top of `used` this month.
    pub fn allows_lines(&self, used: i64, requested: i64) -> bool {
        self.is_unlimited_lines() || used + requested <= self.lines_per_month
    }

    pub fn storage_limit_bytes(&self) -> u64 {
        (self.storage_gb.max(0.0) * BYTES_PER_GB as f64) as u64
    }

    /// Whether an export at `requested` is within the plan. `Original` is never limited.
    pub fn allows_resolution(&self, requested: Resolution) -> bool {
        requested == Resolution::Original
            || self.max_export_resolution == Resolution::Original
            || requested.rank() <= self.max_export_resolution.rank()
    }
}

fn default_lines_per_month() -> i64 {
    1000
}
fn default_storage_gb() -> f64 {
    1.0
}
fn default_retention_days() -> i64 {
    7
}
fn default_max_resolution() -> Resolution {
    Resolution::P720
}
fn default_daily_job_limit() -> i64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_limits() {
        let mut plan = Plan::free();
        assert!(plan.allows_lines(900, 100));
        assert!(!plan.allows_lines(900, 101));

        plan.lines_per_month = -1;
        assert!(plan.allows_lines(1_000_000, 1_000_000));
    }

    #[test]
    fn test_resolution_limits() {
        let plan = Plan::free();
        assert!(plan.allows_resolution(Resolution::P480));
        assert!(plan.allows_resolution(Resolution::P720));
        assert!(!plan.allows_resolution(Resolution::P1080));
        assert!(plan.allows_resolution(Resolution::Original));
    }

    #[test]
    fn test_storage_limit_bytes() {
        let mut plan = Plan::free();
        plan.storage_gb = 2.0;
        assert_eq!(plan.storage_limit_bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_plan_row_defaults() {
        let plan: Plan = serde_json::from_str(r#"{"id":"pro","max_export_resolution":"1080p"}"#).unwrap();
        assert_eq!(plan.max_export_resolution, Resolution::P1080);
        assert_eq!(plan.retention_days, 7);
    }
}

//! Periodic maintenance: expired-file cleanup and the monthly usage reset.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use subx_queue::JobQueue;

use crate::cleanup::cleanup_expired_files;
use crate::context::ProcessingContext;
use crate::error::WorkerResult;

/// Marker TTL; longer than any month so a marker outlives its month.
const RESET_MARKER_TTL_SECS: u64 = 40 * 24 * 3600;

/// Redis marker that makes the monthly reset run once per month across workers.
pub fn usage_reset_marker(now: DateTime<Utc>) -> String {
    format!("usage_reset:{}", now.format("%Y-%m"))
}

/// Reset monthly line usage if no worker has done so this month.
///
/// Returns the number of profiles reset, or `None` when another worker
/// already did it.
pub async fn reset_monthly_usage_once(
    ctx: &ProcessingContext,
    queue: &JobQueue,
    now: DateTime<Utc>,
) -> WorkerResult<Option<u64>> {
    let marker = usage_reset_marker(now);
    if !queue.acquire_marker(&marker, RESET_MARKER_TTL_SECS).await? {
        return Ok(None);
    }
    let reset = ctx.store.reset_monthly_usage().await?;
    info!(
        month = now.month(),
        profiles = reset,
        "Monthly usage reset"
    );
    Ok(Some(reset))
}

/// Run cleanup every `cleanup_interval` until shutdown.
pub async fn run_scheduler(
    ctx: Arc<ProcessingContext>,
    queue: Arc<JobQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(ctx.config.cleanup_interval);
    info!(
        "Scheduler started, cleanup every {:?}",
        ctx.config.cleanup_interval
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = cleanup_expired_files(ctx.store.as_ref(), ctx.objects.as_ref()).await {
                    warn!("Scheduled cleanup failed: {}", e);
                }
                if let Err(e) = reset_monthly_usage_once(&ctx, &queue, Utc::now()).await {
                    warn!("Monthly usage reset failed: {}", e);
                }
            }
        }
    }

    info!("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_marker_is_per_month() {
        let jan = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(usage_reset_marker(jan), "usage_reset:2026-01");
        assert_eq!(usage_reset_marker(feb), "usage_reset:2026-02");
    }
}

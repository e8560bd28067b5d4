//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use subx_db::{JobPatch, JobRow};
use subx_models::{JobResult, JobStatus};
use subx_queue::{JobQueue, ProgressEvent, QueueJob};

use crate::config::WorkerConfig;
use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::{process_job, restore_project, settle_job};
use crate::logging::JobLogger;
use crate::metrics;

/// States a job can be picked up or cancelled from.
const ACTIVE: &[JobStatus] = &[JobStatus::Queued, JobStatus::Processing];

/// What to do with a job whose attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Requeue after the delay.
    Retry { delay: Duration },
    DeadLetter,
    Cancelled,
}

/// `retries` counts failed attempts including this one.
pub fn decide_failure(
    error: &WorkerError,
    retries: u32,
    budget: u32,
    config: &WorkerConfig,
) -> FailureAction {
    if error.is_cancelled() {
        FailureAction::Cancelled
    } else if error.is_retryable() && !error.is_permanent() && retries <= budget {
        FailureAction::Retry {
            delay: config.backoff_for(retries),
        }
    } else {
        FailureAction::DeadLetter
    }
}

/// Run one attempt: move the row to processing, run the handler under the
/// job timeout, and commit the result.
///
/// Both row writes are conditional on the current status. Losing either one
/// to a cancellation turns the attempt into [`WorkerError::Cancelled`] and
/// nothing is billed.
pub async fn run_attempt(
    ctx: &ProcessingContext,
    job: &QueueJob,
    attempt: u32,
) -> WorkerResult<JobResult> {
    let job_id = job.job_id();
    if !ctx
        .store
        .transition_job(job_id, ACTIVE, &JobPatch::processing(attempt))
        .await?
    {
        return Err(WorkerError::Cancelled);
    }
    ctx.publish(ProgressEvent::new(job_id, job.kind(), JobStatus::Processing, 0))
        .await;

    let timeout = ctx.config.job_timeout;
    let result = tokio::time::timeout(timeout, process_job(ctx, job))
        .await
        .map_err(|_| WorkerError::Timeout(timeout.as_secs()))??;

    if !ctx
        .store
        .transition_job(
            job_id,
            &[JobStatus::Processing],
            &JobPatch::completed(result.clone()),
        )
        .await?
    {
        return Err(WorkerError::Cancelled);
    }
    settle_job(ctx, job, &result).await;
    ctx.publish(ProgressEvent::new(job_id, job.kind(), JobStatus::Completed, 100))
        .await;
    Ok(result)
}

/// Put a failed attempt back to queued. False when the row was cancelled
/// (or otherwise settled) in the meantime.
pub async fn mark_for_retry(
    ctx: &ProcessingContext,
    job: &QueueJob,
    message: &str,
) -> WorkerResult<bool> {
    Ok(ctx
        .store
        .transition_job(job.job_id(), &[JobStatus::Processing], &JobPatch::requeued(message))
        .await?)
}

/// Record the cancellation and restore the project, unless the row already
/// settled some other way.
pub async fn finish_cancelled(ctx: &ProcessingContext, job: &QueueJob) {
    let job_id = job.job_id();
    if let Err(e) = ctx
        .store
        .transition_job(job_id, ACTIVE, &JobPatch::cancelled())
        .await
    {
        warn!(job_id = %job_id, "Failed to mark job cancelled: {}", e);
    }
    match ctx.store.get_job(job_id).await {
        Ok(Some(row)) if row.status == JobStatus::Cancelled => {}
        Ok(Some(row)) => {
            debug!(job_id = %job_id, "Job settled as {} before cancellation", row.status);
            return;
        }
        Ok(None) => return,
        Err(e) => warn!(job_id = %job_id, "Job lookup failed: {}", e),
    }
    restore_project(ctx, job, "Cancelled").await;
    ctx.publish(ProgressEvent::new(job_id, job.kind(), JobStatus::Cancelled, 0))
        .await;
}

/// A claimed message whose row is still being worked on elsewhere.
pub fn recently_active(row: &JobRow, window: Duration) -> bool {
    let Ok(window) = chrono::Duration::from_std(window) else {
        return false;
    };
    row.status == JobStatus::Processing && Utc::now() - row.updated_at < window
}

/// Keeps a message's idle time low while its job runs. Stops on drop.
struct Heartbeat(JoinHandle<()>);

impl Heartbeat {
    fn start(queue: Arc<JobQueue>, consumer_name: String, message_id: String) -> Self {
        let every = queue.config().heartbeat_interval();
        Self(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match queue.touch(&consumer_name, &message_id).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!(message_id, "Heartbeat failed: {}", e),
                }
            }
        }))
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    ctx: Arc<ProcessingContext>,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: ProcessingContext, queue: JobQueue) -> Self {
        let config = ctx.config.clone();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            ctx: Arc::new(ctx),
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn context(&self) -> Arc<ProcessingContext> {
        Arc::clone(&self.ctx)
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::clone(&self.queue)
    }

    pub fn subscribe_shutdown(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Consume until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; their messages stay pending",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically take over messages left pending by dead consumers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let every = self.config.claim_interval;
        let min_idle_ms = queue.config().claim_min_idle_ms();
        let window = queue.config().visibility_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available.min(5)).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    if let Ok(Some(row)) = ctx.store.get_job(job.job_id()).await {
                                        if recently_active(&row, window) {
                                            // The owner's next heartbeat takes it back
                                            debug!(job_id = %job.job_id(), "Claimed job still active, skipping");
                                            continue;
                                        }
                                    }
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let consumer_name = consumer_name.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, queue, consumer_name, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let consumer_name = self.consumer_name.clone();
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, queue, consumer_name, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        consumer_name: String,
        message_id: String,
        job: QueueJob,
    ) {
        let logger = JobLogger::new(job.job_id(), job.kind());
        let span = logger.create_span();
        async move {
            let job_id = job.job_id().as_str();

            if Self::already_settled(&ctx, &job).await {
                info!(job_id, "Job already settled, skipping");
                if let Err(e) = queue.ack(&message_id).await {
                    error!(job_id, "Failed to ack job: {}", e);
                }
                let _ = queue.clear_dedup(&job).await;
                return;
            }

            // Held until the message is acked, requeued or dead-lettered
            let _heartbeat = Heartbeat::start(Arc::clone(&queue), consumer_name, message_id.clone());

            let attempt = queue.get_retry_count(job_id).await.unwrap_or(0) + 1;
            metrics::record_job_started(job.kind().as_str());
            let started = Instant::now();

            match run_attempt(&ctx, &job, attempt).await {
                Ok(_) => {
                    logger.log_completion(&format!("attempt {}", attempt));
                    metrics::record_job_completed(
                        job.kind().as_str(),
                        started.elapsed().as_secs_f64(),
                    );
                    if let Err(e) = queue.ack(&message_id).await {
                        error!(job_id, "Failed to ack job: {}", e);
                    }
                    if let Err(e) = queue.clear_dedup(&job).await {
                        warn!(job_id, "Failed to clear dedup key: {}", e);
                    }
                    let _ = queue.clear_retry(job_id).await;
                }
                Err(e) => Self::handle_failure(&ctx, &queue, &message_id, &job, e, &logger).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Cancelled or finished before this delivery.
    async fn already_settled(ctx: &ProcessingContext, job: &QueueJob) -> bool {
        match ctx.store.get_job(job.job_id()).await {
            Ok(Some(row)) => row.status.is_terminal(),
            Ok(None) => false,
            Err(e) => {
                debug!(job_id = %job.job_id(), "Job lookup failed: {}", e);
                false
            }
        }
    }

    /// Cancelled path: restore the project and drop the message.
    async fn settle_cancelled(
        ctx: &ProcessingContext,
        queue: &JobQueue,
        message_id: &str,
        job: &QueueJob,
        logger: &JobLogger,
    ) {
        let job_id = job.job_id();
        logger.log_warning("cancelled");
        metrics::record_job_cancelled(job.kind().as_str());
        finish_cancelled(ctx, job).await;
        if let Err(e) = queue.ack(message_id).await {
            error!(job_id = %job_id, "Failed to ack cancelled job: {}", e);
        }
        let _ = queue.clear_dedup(job).await;
        let _ = queue.clear_retry(job_id.as_str()).await;
    }

    async fn handle_failure(
        ctx: &ProcessingContext,
        queue: &JobQueue,
        message_id: &str,
        job: &QueueJob,
        error: WorkerError,
        logger: &JobLogger,
    ) {
        let job_id = job.job_id();
        let kind = job.kind();
        let message = error.user_message();

        let retries = queue.increment_retry(job_id.as_str()).await.unwrap_or(u32::MAX);
        let action = decide_failure(&error, retries, queue.max_retries(job), &ctx.config);

        match action {
            FailureAction::Cancelled => {
                Self::settle_cancelled(ctx, queue, message_id, job, logger).await;
            }
            FailureAction::Retry { delay } => {
                match mark_for_retry(ctx, job, &message).await {
                    Ok(true) => {}
                    Ok(false) => {
                        Self::settle_cancelled(ctx, queue, message_id, job, logger).await;
                        return;
                    }
                    Err(e) => warn!(job_id = %job_id, "Failed to mark job requeued: {}", e),
                }
                logger.log_warning(&format!(
                    "attempt failed, retry {} in {:?}: {}",
                    retries, delay, error
                ));
                metrics::record_job_retried(kind.as_str());
                ctx.publish(
                    ProgressEvent::new(job_id, kind, JobStatus::Queued, 0)
                        .with_message(format!("Retrying: {}", message)),
                )
                .await;

                tokio::time::sleep(delay).await;
                if ctx.is_cancelled(job_id).await {
                    Self::settle_cancelled(ctx, queue, message_id, job, logger).await;
                    return;
                }
                match queue.requeue(job).await {
                    Ok(_) => {
                        if let Err(e) = queue.ack(message_id).await {
                            error!(job_id = %job_id, "Failed to ack retried job: {}", e);
                        }
                    }
                    // Left pending: the claim task picks it up again
                    Err(e) => error!(job_id = %job_id, "Failed to requeue job: {}", e),
                }
            }
            FailureAction::DeadLetter => {
                match ctx
                    .store
                    .transition_job(job_id, ACTIVE, &JobPatch::failed(&message))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        Self::settle_cancelled(ctx, queue, message_id, job, logger).await;
                        return;
                    }
                    Err(e) => warn!(job_id = %job_id, "Failed to mark job failed: {}", e),
                }
                logger.log_error(&error.to_string());
                metrics::record_job_failed(kind.as_str());
                restore_project(ctx, job, &message).await;
                if let Err(e) = queue.dlq(message_id, job, &error.to_string()).await {
                    error!(job_id = %job_id, "Failed to move job to DLQ: {}", e);
                }
                if let Err(e) = queue.clear_dedup(job).await {
                    warn!(job_id = %job_id, "Failed to clear dedup key: {}", e);
                }
                ctx.publish(
                    ProgressEvent::new(job_id, kind, JobStatus::Failed, 0).with_message(message),
                )
                .await;
            }
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

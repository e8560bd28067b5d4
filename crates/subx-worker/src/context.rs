//! Shared state handed to every job handler.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use subx_db::Store;
use subx_models::{JobId, JobKind, JobStatus, Plan};
use subx_queue::{ProgressChannel, ProgressEvent};
use subx_storage::ObjectStore;
use subx_translate::{create_engine, EngineKeys, TranslateResult, TranslationEngine};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Builds a translation engine from its kind, API key and optional model.
pub type EngineFactory = Arc<
    dyn Fn(subx_models::EngineKind, &str, Option<&str>) -> TranslateResult<Box<dyn TranslationEngine>>
        + Send
        + Sync,
>;

pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    /// Absent when running without Redis (tests, one-off tools)
    pub progress: Option<ProgressChannel>,
    pub engine_keys: EngineKeys,
    pub engine_factory: EngineFactory,
    pub ffmpeg_semaphore: Arc<Semaphore>,
}

impl ProcessingContext {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        progress: Option<ProgressChannel>,
        engine_keys: EngineKeys,
    ) -> Self {
        let ffmpeg_semaphore = Arc::new(Semaphore::new(config.max_ffmpeg_processes));
        Self {
            config,
            store,
            objects,
            progress,
            engine_keys,
            engine_factory: Arc::new(create_engine),
            ffmpeg_semaphore,
        }
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    /// Publish an event. Delivery is best effort.
    pub async fn publish(&self, event: ProgressEvent) {
        if let Some(channel) = &self.progress {
            if let Err(e) = channel.publish(&event).await {
                debug!(job_id = %event.job_id, "Progress publish failed: {}", e);
            }
        }
    }

    /// Store the job's progress and tell subscribers.
    pub async fn report_progress(
        &self,
        job_id: &JobId,
        kind: JobKind,
        progress: u8,
        message: Option<&str>,
    ) -> WorkerResult<()> {
        self.store
            .update_job(job_id, &subx_db::JobPatch::progress(progress))
            .await?;
        let mut event = ProgressEvent::new(job_id, kind, JobStatus::Processing, progress);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.publish(event).await;
        Ok(())
    }

    /// Whether the job row has been cancelled. Read errors count as not cancelled.
    pub async fn is_cancelled(&self, job_id: &JobId) -> bool {
        match self.store.get_job(job_id).await {
            Ok(Some(row)) => row.status == JobStatus::Cancelled,
            Ok(None) => false,
            Err(e) => {
                debug!(job_id = %job_id, "Cancel check failed: {}", e);
                false
            }
        }
    }

    /// The user's plan, or the free plan when the profile is missing.
    pub async fn plan_for_user(&self, user_id: &str) -> WorkerResult<Plan> {
        match self.store.get_profile(user_id).await? {
            Some(profile) => Ok(self.store.plan_for_profile(&profile).await?),
            None => Ok(Plan::free()),
        }
    }
}

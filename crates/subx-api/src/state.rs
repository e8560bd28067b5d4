//! Application state.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use subx_db::{Store, SupabaseStore};
use subx_queue::{JobQueue, ProgressChannel};
use subx_storage::{LocalStore, ObjectStore, S3Store};
use subx_translate::EngineKeys;

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;
use crate::middleware::RateLimiterCache;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jwt: Arc<JwtVerifier>,
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    /// Set when objects live on the local filesystem and `/files` serves them.
    pub local_files: Option<Arc<LocalStore>>,
    pub queue: Arc<JobQueue>,
    pub progress: Option<Arc<ProgressChannel>>,
    pub engine_keys: Arc<EngineKeys>,
    pub rate_limiter: Arc<RateLimiterCache>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            jwt: Arc::new(JwtVerifier::new(&config.jwt_secret)),
            rate_limiter: Arc::new(RateLimiterCache::new(
                config.rate_limit_rps,
                config.rate_limit_burst,
            )),
            config,
            store,
            objects,
            local_files: None,
            queue,
            progress: None,
            engine_keys: Arc::new(EngineKeys::default()),
            metrics: None,
        }
    }

    /// Serve a filesystem store through `/files`.
    pub fn with_local_files(mut self, local: Arc<LocalStore>) -> Self {
        self.local_files = Some(local);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressChannel>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_engine_keys(mut self, keys: EngineKeys) -> Self {
        self.engine_keys = Arc::new(keys);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build state from the environment.
    ///
    /// `STORAGE_DIR` switches objects to the local filesystem; otherwise the
    /// R2 bucket configured by `R2_*` is used.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = Arc::new(SupabaseStore::from_env()?);
        let queue = Arc::new(JobQueue::from_env()?);
        let progress = Arc::new(ProgressChannel::new(&queue.config().redis_url)?);

        let local_dir = std::env::var("STORAGE_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty());

        let state = match local_dir {
            Some(dir) => {
                let secret = std::env::var("FILE_URL_SECRET")
                    .map_err(|_| anyhow::anyhow!("FILE_URL_SECRET must be set with STORAGE_DIR"))?;
                let base_url = std::env::var("PUBLIC_BASE_URL").unwrap_or_default();
                let local = Arc::new(LocalStore::new(dir, secret, base_url).await?);
                Self::new(config, store, local.clone(), queue).with_local_files(local)
            }
            None => {
                let objects: Arc<dyn ObjectStore> = Arc::new(S3Store::from_env().await?);
                Self::new(config, store, objects, queue)
            }
        };

        Ok(state
            .with_progress(progress)
            .with_engine_keys(EngineKeys::from_env()))
    }
}

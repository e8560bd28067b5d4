//! Subtitle worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subx_db::{Store, SupabaseStore};
use subx_queue::{JobQueue, ProgressChannel};
use subx_translate::EngineKeys;
use subx_worker::scheduler::run_scheduler;
use subx_worker::{JobExecutor, ProcessingContext, WorkerConfig};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "subx=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    // TLS for Supabase, R2 and the engine APIs
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting subx-worker");

    if let Some(port) = std::env::var("WORKER_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
        {
            Ok(()) => info!("Prometheus metrics listening on :{}", port),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store: Arc<dyn Store> = match SupabaseStore::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create database client: {}", e);
            std::process::exit(1);
        }
    };
    let objects = match subx_storage::store_from_env().await {
        Ok(o) => o,
        Err(e) => {
            error!("Failed to create object storage: {}", e);
            std::process::exit(1);
        }
    };
    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    let progress = match ProgressChannel::new(&queue.config().redis_url) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("Progress channel unavailable, continuing without live updates: {}", e);
            None
        }
    };

    let engine_keys = EngineKeys::from_env();
    info!(engines = ?engine_keys.configured(), "Translation engines with system keys");

    let ctx = ProcessingContext::new(config, store, objects, progress, engine_keys);
    let executor = Arc::new(JobExecutor::new(ctx, queue));

    let scheduler = tokio::spawn(run_scheduler(
        executor.context(),
        executor.queue(),
        executor.subscribe_shutdown(),
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    scheduler.await.ok();
    info!("Worker shutdown complete");
}

//! Frame processing worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vframe_media::FfmpegFrameExtractor;
use vframe_ml_client::{ChromaVectorStore, OllamaCaptioner, OllamaEmbedder};
use vframe_models::FrameUrls;
use vframe_progress::{
    JobQueue, JobStateMachine, QueueConfig, RedisEventBus, RedisJobRepository, RedisProgressStore,
};
use vframe_worker::{
    metrics, FramePipeline, FramePool, JobExecutor, JobOrchestrator, WorkerConfig, WorkerResult,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vframe=info,info"));

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

fn build_executor(config: WorkerConfig) -> WorkerResult<JobExecutor> {
    let urls = FrameUrls::new(config.frame_url_prefix.clone());

    let pipeline = FramePipeline::new(
        Arc::new(RedisProgressStore::new(&config.redis_url, urls.clone())?),
        Arc::new(RedisEventBus::new(&config.redis_url)?),
        Arc::new(FfmpegFrameExtractor::new()),
        Arc::new(OllamaCaptioner::new(&config.ml)?),
        Arc::new(OllamaEmbedder::new(&config.ml)?),
        Arc::new(ChromaVectorStore::new(&config.ml)?),
    );
    let jobs = JobStateMachine::new(Arc::new(RedisJobRepository::new(&config.redis_url)?));

    let orchestrator = JobOrchestrator::new(
        FramePool::new(Arc::new(pipeline)),
        jobs,
        urls,
        config.frames_dir.clone(),
        config.frame_concurrency,
    );

    let queue = JobQueue::new(QueueConfig {
        redis_url: config.redis_url.clone(),
        ..QueueConfig::from_env()
    })?;

    Ok(JobExecutor::new(config, queue, orchestrator))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vframe-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker configuration: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let executor = match build_executor(config) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!("Failed to create job executor: {}", e);
            std::process::exit(1);
        }
    };

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

    info!("Worker shutdown complete");
}

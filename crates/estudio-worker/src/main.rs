//! Render worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use estudio_queue::JobQueue;
use estudio_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS to Redis/TTS/delivery)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("estudio=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

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

    info!("Starting estudio-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // Prometheus exporter, when configured
    if let Some(addr) = config.metrics_addr {
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on {}", addr),
            Err(e) => error!("Failed to install Prometheus exporter: {}", e),
        }
    }

    let queue = match JobQueue::new(estudio_queue::QueueConfig {
        redis_url: config.redis_url.clone(),
        ..estudio_queue::QueueConfig::from_env()
    }) {
        Ok(queue) => queue,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let executor = Arc::new(JobExecutor::new(config, queue));

    // Ctrl-C triggers graceful shutdown
    {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            executor.shutdown();
        });
    }

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use detect_pipeline::{
    config::AppConfig,
    services::{
        detector::HttpDetector,
        notifier::CallbackNotifier,
        queue::RedisQueue,
        results::{self, PgResultStore, ResultStore},
        storage::S3ImageStore,
    },
    worker::{Worker, WorkerSettings},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Install Prometheus metrics exporter
    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("Invalid metrics address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");

    metrics::describe_counter!("detection_jobs_total", "Total deliveries received");
    metrics::describe_counter!(
        "detection_jobs_completed",
        "Jobs with a persisted prediction summary"
    );
    metrics::describe_counter!("detection_jobs_failed", "Jobs dropped as unprocessable");
    metrics::describe_gauge!("detection_queue_depth", "Pending jobs in the queue");

    // Initialize the prediction store
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = results::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    results::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = RedisQueue::new(
        &config.redis_url,
        &config.queue_name,
        Duration::from_secs(config.visibility_timeout_secs),
    )
    .expect("Failed to initialize job queue");

    let store = S3ImageStore::new(
        &config.images_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object store");

    let results: Arc<dyn ResultStore> = Arc::new(PgResultStore::new(db_pool));

    let detector = HttpDetector::new(config.detector_url.clone(), config.detector_token.clone());

    let notifier = CallbackNotifier::new(&config.callback_url, Arc::clone(&results));

    let worker = Worker::new(
        Arc::new(queue),
        Arc::new(store),
        results,
        Arc::new(detector),
        Arc::new(notifier),
        WorkerSettings {
            poll_wait: Duration::from_secs(config.poll_wait_secs),
            max_detector_attempts: config.max_detector_attempts,
            predictions_prefix: config.predictions_prefix.clone(),
        },
    );

    tracing::info!("Worker ready, starting job processing loop");
    worker.run().await;
}

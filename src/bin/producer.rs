use std::sync::Arc;
use std::time::Duration;

use detect_pipeline::{config::AppConfig, producer::Producer, services::queue::RedisQueue};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (image_key, chat_id) = match (args.next(), args.next()) {
        (Some(image_key), Some(chat_id)) => (image_key, chat_id),
        _ => {
            eprintln!("usage: producer <image-key> <chat-id>");
            std::process::exit(2);
        }
    };

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let queue = RedisQueue::new(
        &config.redis_url,
        &config.queue_name,
        Duration::from_secs(config.visibility_timeout_secs),
    )
    .expect("Failed to initialize job queue");

    let producer = Producer::new(Arc::new(queue));
    match producer.enqueue(&image_key, &chat_id).await {
        Ok(job_id) => println!("{job_id}"),
        Err(e) => {
            eprintln!("enqueue failed: {e}");
            std::process::exit(1);
        }
    }
}

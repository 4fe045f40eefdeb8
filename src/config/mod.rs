use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Redis connection string for the job queue
    pub redis_url: String,

    /// PostgreSQL connection string for the prediction store
    pub database_url: String,

    /// Bucket holding source images and prediction artifacts
    pub images_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    /// S3 region name
    pub s3_region: String,

    /// S3 access key ID
    pub s3_access_key: String,

    /// S3 secret access key
    pub s3_secret_key: String,

    /// Detection service endpoint (e.g. "http://yolo:8080/detect")
    pub detector_url: String,

    /// Optional bearer token for the detection service
    #[serde(default)]
    pub detector_token: Option<String>,

    /// Front-end base URL for completion callbacks (POST {url}/results)
    pub callback_url: String,

    /// Queue name; Redis keys are derived from it
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Long-poll wait window for a single receive, in seconds
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,

    /// How long a received message stays invisible before it becomes
    /// redeliverable, in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Delivery attempts after which a failing detection is given up on
    #[serde(default = "default_max_detector_attempts")]
    pub max_detector_attempts: u32,

    /// Key prefix for annotated result images
    #[serde(default = "default_predictions_prefix")]
    pub predictions_prefix: String,

    /// Prometheus exporter bind address (worker binary only)
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_queue_name() -> String {
    "detect".to_string()
}

fn default_poll_wait_secs() -> u64 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_max_detector_attempts() -> u32 {
    3
}

fn default_predictions_prefix() -> String {
    "predictions".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

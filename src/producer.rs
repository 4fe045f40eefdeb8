use std::sync::Arc;

use crate::models::job::JobDescriptor;
use crate::services::queue::{JobQueue, QueueError};

const UPLOAD_NOTICE: &str = "A new image was uploaded to the s3 bucket";

/// Builds job descriptors and submits them to the queue on behalf of the
/// front-end. Exactly one queue entry appears per successful call; the
/// transport is at-least-once, so consumers must tolerate duplicates.
pub struct Producer {
    queue: Arc<dyn JobQueue>,
}

impl Producer {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue a detection job for a stored image; returns the assigned
    /// job id. On queue failure no partial state is left behind.
    pub async fn enqueue(
        &self,
        image_key: &str,
        recipient_id: &str,
    ) -> Result<String, ProducerError> {
        if image_key.is_empty() {
            return Err(ProducerError::Invalid("image key must not be empty"));
        }
        if recipient_id.is_empty() {
            return Err(ProducerError::Invalid("recipient id must not be empty"));
        }

        let job = JobDescriptor {
            img_name: image_key.to_string(),
            chat_id: recipient_id.to_string(),
            text: Some(UPLOAD_NOTICE.to_string()),
        };
        let body = serde_json::to_string(&job).map_err(QueueError::Serialize)?;

        let message_id = self.queue.send(&body).await?;
        tracing::info!(
            job_id = %message_id,
            image_key = %image_key,
            "detection job enqueued"
        );
        Ok(message_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("invalid job: {0}")]
    Invalid(&'static str),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),
}

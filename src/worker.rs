use std::sync::Arc;
use std::time::Duration;

use crate::models::detection::PredictionSummary;
use crate::models::job::JobDescriptor;
use crate::services::detector::Detector;
use crate::services::notifier::Notifier;
use crate::services::queue::{Delivery, JobQueue, QueueError};
use crate::services::render;
use crate::services::results::ResultStore;
use crate::services::storage::ObjectStore;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Terminal classification of one processing pass over one delivery.
#[derive(Debug)]
pub enum JobOutcome {
    /// Summary persisted on this pass.
    Completed,
    /// A previous pass already persisted the summary; redelivery detected,
    /// only the notification is repeated.
    AlreadyProcessed,
    /// Transient failure. The message is left unacknowledged so the
    /// visibility timeout redelivers it.
    Retryable(String),
    /// Unprocessable regardless of retries. The message is acknowledged to
    /// stop redelivery and the recipient is told no prediction was made.
    Poison(String),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Long-poll wait window per receive.
    pub poll_wait: Duration,
    /// Delivery attempts after which a failing detector poisons the job.
    pub max_detector_attempts: u32,
    /// Key prefix for annotated result images.
    pub predictions_prefix: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(5),
            max_detector_attempts: 3,
            predictions_prefix: "predictions".to_string(),
        }
    }
}

/// The pipeline engine. Processes one job at a time, to completion, before
/// the next receive; scale-out is running more worker processes against the
/// same queue. All collaborators are injected, which is what the test
/// doubles hang off.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ObjectStore>,
    results: Arc<dyn ResultStore>,
    detector: Arc<dyn Detector>,
    notifier: Arc<dyn Notifier>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ObjectStore>,
        results: Arc<dyn ResultStore>,
        detector: Arc<dyn Detector>,
        notifier: Arc<dyn Notifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            store,
            results,
            detector,
            notifier,
            settings,
        }
    }

    /// Run the polling loop forever. Job-level failures never escape; only
    /// receive errors are surfaced here, and those just back off and retry.
    pub async fn run(&self) {
        loop {
            match self.poll_once().await {
                Ok(true) => {
                    tracing::debug!("delivery handled, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!("no jobs available");
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue receive failed, backing off");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }

            if let Ok(depth) = self.queue.depth().await {
                metrics::gauge!("detection_queue_depth").set(depth as f64);
            }
        }
    }

    /// Redrive expired deliveries, then receive and handle at most one
    /// message. Returns whether a message was handled.
    pub async fn poll_once(&self) -> Result<bool, QueueError> {
        let redriven = self.queue.redrive_expired().await?;
        if redriven > 0 {
            tracing::debug!(redriven, "returned expired deliveries to the queue");
        }

        let delivery = match self.queue.receive(self.settings.poll_wait).await? {
            Some(d) => d,
            None => return Ok(false),
        };
        self.handle_delivery(delivery).await;
        Ok(true)
    }

    /// Dispatch one delivery: parse, process, notify, acknowledge. The only
    /// path that leaves the message on the queue is a retryable failure.
    async fn handle_delivery(&self, delivery: Delivery) {
        let job_id = delivery.message_id.clone();
        metrics::counter!("detection_jobs_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            receive_count = delivery.receive_count,
            "received delivery"
        );

        let job = match JobDescriptor::from_body(&delivery.body) {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "dropping malformed message");
                metrics::counter!("detection_jobs_failed").increment(1);
                if let Some(chat_id) = &err.chat_id {
                    self.notify_best_effort(&job_id, chat_id).await;
                }
                self.acknowledge(&delivery).await;
                return;
            }
        };

        match self
            .process(&job_id, &job, delivery.receive_count)
            .await
        {
            JobOutcome::Completed | JobOutcome::AlreadyProcessed => {
                tracing::info!(job_id = %job_id, image = %job.img_name, "job completed");
                metrics::counter!("detection_jobs_completed").increment(1);
                self.notify_best_effort(&job_id, &job.chat_id).await;
                self.acknowledge(&delivery).await;
            }
            JobOutcome::Retryable(reason) => {
                tracing::warn!(
                    job_id = %job_id,
                    reason = %reason,
                    "job abandoned, awaiting redelivery"
                );
            }
            JobOutcome::Poison(reason) => {
                tracing::error!(job_id = %job_id, reason = %reason, "job unprocessable, giving up");
                metrics::counter!("detection_jobs_failed").increment(1);
                // No summary exists, so this notifies the failure text.
                self.notify_best_effort(&job_id, &job.chat_id).await;
                self.acknowledge(&delivery).await;
            }
        }
    }

    /// Drive one job through download, detect, upload and persist. Pure with
    /// respect to the queue: acknowledgment and notification stay with the
    /// dispatcher.
    pub async fn process(
        &self,
        job_id: &str,
        job: &JobDescriptor,
        receive_count: u32,
    ) -> JobOutcome {
        // Redelivery of an already-completed job must not recompute.
        match self.results.get(job_id).await {
            Ok(Some(_)) => return JobOutcome::AlreadyProcessed,
            Ok(None) => {}
            Err(e) => return JobOutcome::Retryable(format!("result store lookup: {e}")),
        }

        let image = match self.store.download(&job.img_name).await {
            Ok(bytes) => bytes,
            Err(e) => return JobOutcome::Retryable(format!("download {}: {e}", job.img_name)),
        };
        tracing::debug!(job_id = %job_id, bytes = image.len(), "image downloaded");

        let output = match self.detector.detect(&image).await {
            Ok(output) => output,
            Err(e) => {
                if receive_count >= self.settings.max_detector_attempts {
                    return JobOutcome::Poison(format!(
                        "detector failed on attempt {receive_count}: {e}"
                    ));
                }
                return JobOutcome::Retryable(format!("detector: {e}"));
            }
        };
        tracing::debug!(job_id = %job_id, detections = output.detections.len(), "detection done");

        // The derived key is deterministic, so retries overwrite rather than
        // duplicate. The artifact goes up before the summary: summary
        // presence must imply the artifact exists.
        let derived_key = derived_image_key(&self.settings.predictions_prefix, &job.img_name);
        let annotated = match output.annotated_image {
            Some(bytes) => bytes,
            None => match render::annotate(&image, &output.detections) {
                Ok(bytes) => bytes,
                Err(e) => return JobOutcome::Poison(format!("annotate {}: {e}", job.img_name)),
            },
        };
        if let Err(e) = self.store.upload(&derived_key, &annotated, "image/png").await {
            return JobOutcome::Retryable(format!("upload {derived_key}: {e}"));
        }

        let summary = PredictionSummary {
            prediction_id: job_id.to_string(),
            original_img_path: job.img_name.clone(),
            predicted_img_path: format!("{job_id}/{}", file_name(&job.img_name)),
            s3_img_path: derived_key,
            labels: output.detections,
            time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        if let Err(e) = self.results.upsert(job_id, &summary).await {
            return JobOutcome::Retryable(format!("persist summary: {e}"));
        }

        JobOutcome::Completed
    }

    async fn notify_best_effort(&self, job_id: &str, recipient_id: &str) {
        if let Err(e) = self.notifier.notify(job_id, recipient_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "completion notification failed");
        }
    }

    /// Delete the message. Must happen last: a crash before this point only
    /// causes a safe retry. A failed delete is logged, not retried; the
    /// idempotence check absorbs the resulting redelivery.
    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.delete(&delivery.receipt_handle).await {
            tracing::warn!(
                job_id = %delivery.message_id,
                error = %e,
                "failed to delete message from queue"
            );
        }
    }
}

/// Object-store key for the annotated result image, derived from the source
/// key's final path component.
fn derived_image_key(prefix: &str, img_name: &str) -> String {
    format!("{prefix}/{}", file_name(img_name))
}

fn file_name(img_name: &str) -> &str {
    match img_name.rsplit_once('/') {
        Some((_, name)) => name,
        None => img_name,
    }
}

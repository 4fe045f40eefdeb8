use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::models::detection::{histogram_text, PredictionSummary, NO_PREDICTION_TEXT};
use crate::services::results::{ResultStore, ResultStoreError};

/// Terminal-status callback to the front-end. Best effort: at most one
/// attempt per invocation, and failures never reach the worker's critical
/// path (the worker logs and acknowledges regardless).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job_id: &str, recipient_id: &str) -> Result<(), NotifyError>;
}

/// What the recipient ultimately sees: the detection report (or the fixed
/// failure text) plus the key of the annotated image, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
}

/// Compose the completion message for a job. A persisted summary renders the
/// class histogram, even when no objects were detected; an absent summary
/// means processing failed and yields the fixed failure text.
pub fn compose_message(summary: Option<&PredictionSummary>) -> CompletionMessage {
    match summary {
        Some(summary) => CompletionMessage {
            text: histogram_text(&summary.labels),
            image_key: Some(summary.s3_img_path.clone()),
        },
        None => CompletionMessage {
            text: NO_PREDICTION_TEXT.to_string(),
            image_key: None,
        },
    }
}

/// HTTP notifier: looks up the summary, composes the message and POSTs it to
/// the front-end's `/results` endpoint with the job and recipient ids as
/// query parameters. The front-end replies with a fixed acknowledgment.
pub struct CallbackNotifier {
    http: Client,
    base_url: String,
    results: Arc<dyn ResultStore>,
}

impl CallbackNotifier {
    pub fn new(base_url: &str, results: Arc<dyn ResultStore>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            results,
        }
    }
}

#[async_trait]
impl Notifier for CallbackNotifier {
    async fn notify(&self, job_id: &str, recipient_id: &str) -> Result<(), NotifyError> {
        let summary = self.results.get(job_id).await?;
        let message = compose_message(summary.as_ref());

        let url = format!("{}/results", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("predictionId", job_id), ("chatId", recipient_id)])
            .json(&message)
            .send()
            .await
            .map_err(NotifyError::Http)?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("result store lookup failed: {0}")]
    ResultStore(#[from] ResultStoreError),

    #[error("front-end rejected the callback with status {0}")]
    Rejected(u16),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detection::{Detection, DETECTED_OBJECTS_HEADER};

    fn summary_with(labels: Vec<Detection>) -> PredictionSummary {
        PredictionSummary {
            prediction_id: "job-1".to_string(),
            original_img_path: "images/cat.jpg".to_string(),
            predicted_img_path: "job-1/cat.jpg".to_string(),
            s3_img_path: "predictions/cat.jpg".to_string(),
            labels,
            time: 1_700_000_000.0,
        }
    }

    #[test]
    fn composes_histogram_for_persisted_summary() {
        let summary = summary_with(vec![Detection {
            class: "cat".to_string(),
            cx: 0.5,
            cy: 0.5,
            width: 0.2,
            height: 0.3,
            confidence: None,
        }]);
        let message = compose_message(Some(&summary));
        assert_eq!(message.text, format!("{DETECTED_OBJECTS_HEADER}\ncat : 1\n"));
        assert_eq!(message.image_key.as_deref(), Some("predictions/cat.jpg"));
    }

    #[test]
    fn empty_summary_is_still_a_success_message() {
        let message = compose_message(Some(&summary_with(vec![])));
        assert_ne!(message.text, NO_PREDICTION_TEXT);
        assert!(message.image_key.is_some());
    }

    #[test]
    fn missing_summary_yields_failure_text() {
        let message = compose_message(None);
        assert_eq!(message.text, NO_PREDICTION_TEXT);
        assert!(message.image_key.is_none());
    }
}

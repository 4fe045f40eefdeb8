use serde::{Deserialize, Serialize};

/// Message body enqueued by the producer and consumed by the worker.
///
/// Immutable once enqueued. The queue transport supplies the job identity
/// (message id) and the acknowledgment token (receipt handle); the body only
/// carries what the job needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Object-store key of the source image.
    pub img_name: String,

    /// Opaque identifier of the notification target.
    pub chat_id: String,

    /// Informational text written by the producer; consumers ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Lenient view of a message body, used to salvage a recipient from a
/// malformed message before it is dropped.
#[derive(Debug, Deserialize)]
struct PartialJob {
    #[serde(default)]
    img_name: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// A message body that cannot be processed regardless of retries.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct MalformedJob {
    pub reason: String,
    /// Recipient recovered from the partial body, when present, so a
    /// failure notification can still be delivered.
    pub chat_id: Option<String>,
}

impl JobDescriptor {
    /// Parse and validate a raw message body.
    pub fn from_body(body: &str) -> Result<Self, MalformedJob> {
        let partial: PartialJob = serde_json::from_str(body).map_err(|e| MalformedJob {
            reason: format!("body is not valid JSON: {e}"),
            chat_id: None,
        })?;

        let chat_id = partial.chat_id.filter(|id| !id.is_empty());

        let img_name = match partial.img_name.filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => {
                return Err(MalformedJob {
                    reason: "missing img_name".to_string(),
                    chat_id,
                })
            }
        };

        let chat_id = match chat_id {
            Some(id) => id,
            None => {
                return Err(MalformedJob {
                    reason: "missing chat_id".to_string(),
                    chat_id: None,
                })
            }
        };

        Ok(Self {
            img_name,
            chat_id,
            text: partial.text,
        })
    }
}

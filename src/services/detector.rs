use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::detection::Detection;

/// Output of one detection pass.
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    /// Detections in the detector's native output order.
    pub detections: Vec<Detection>,
    /// Annotated image produced by the detection service, if it returned one.
    pub annotated_image: Option<Vec<u8>>,
}

/// Black-box detection routine: raw image bytes in, detections out.
/// An empty detection list is a valid, non-error outcome.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<DetectorOutput, DetectorError>;
}

/// HTTP client for the detection service.
pub struct HttpDetector {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
    /// Base64-encoded annotated image, when the service renders one.
    #[serde(default)]
    annotated_image: Option<String>,
}

impl HttpDetector {
    pub fn new(endpoint: String, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            api_token,
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image: &[u8]) -> Result<DetectorOutput, DetectorError> {
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
        });

        let mut request = self.http.post(&self.endpoint).json(&request_body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(DetectorError::Http)?;
        if !response.status().is_success() {
            return Err(DetectorError::Api(format!(
                "detector returned {}",
                response.status()
            )));
        }

        let parsed: DetectResponse = response.json().await.map_err(DetectorError::Http)?;

        let annotated_image = match parsed.annotated_image {
            Some(b64) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(DetectorError::Decode)?,
            ),
            None => None,
        };

        Ok(DetectorOutput {
            detections: parsed.detections,
            annotated_image,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Api(String),

    #[error("failed to decode annotated image: {0}")]
    Decode(#[from] base64::DecodeError),
}

use serde::{Deserialize, Serialize};

/// Fixed text sent when processing failed before a summary was persisted.
pub const NO_PREDICTION_TEXT: &str =
    "No prediction could be made for the given image. Please try a different image";

/// Header line of the detected-objects message.
pub const DETECTED_OBJECTS_HEADER: &str = "The following objects were detected in the image :";

/// One detected object instance, with a normalized bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Durable record of one successfully processed job.
///
/// Presence of a summary for a job id is the single source of truth for
/// "processing succeeded"; a redelivered message whose summary already exists
/// is only re-notified, never recomputed. Detections keep the detector's
/// native output order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub prediction_id: String,
    pub original_img_path: String,
    pub predicted_img_path: String,
    pub s3_img_path: String,
    pub labels: Vec<Detection>,
    /// Epoch seconds at completion time.
    pub time: f64,
}

/// Count detections per class, preserving first-seen class order.
pub fn class_histogram(labels: &[Detection]) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = Vec::new();
    for det in labels {
        match counts.iter_mut().find(|(class, _)| *class == det.class) {
            Some((_, n)) => *n += 1,
            None => counts.push((det.class.clone(), 1)),
        }
    }
    counts
}

/// Render the user-facing detection report: a header line followed by one
/// `class : count` line per class. An empty detection list renders the header
/// alone.
pub fn histogram_text(labels: &[Detection]) -> String {
    let mut text = String::from(DETECTED_OBJECTS_HEADER);
    text.push('\n');
    for (class, count) in class_histogram(labels) {
        text.push_str(&format!("{class} : {count}\n"));
    }
    text
}

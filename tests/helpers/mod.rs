//! In-memory doubles for the worker's injected dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use detect_pipeline::models::detection::{Detection, PredictionSummary};
use detect_pipeline::producer::Producer;
use detect_pipeline::services::detector::{Detector, DetectorError, DetectorOutput};
use detect_pipeline::services::notifier::{
    compose_message, CompletionMessage, Notifier, NotifyError,
};
use detect_pipeline::services::queue::{Delivery, JobQueue, QueueError};
use detect_pipeline::services::results::{ResultStore, ResultStoreError};
use detect_pipeline::services::storage::{ObjectStore, StorageError};
use detect_pipeline::worker::{Worker, WorkerSettings};

#[derive(Clone)]
struct Message {
    message_id: String,
    body: String,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Message>,
    inflight: HashMap<String, Message>,
    receive_counts: HashMap<String, u32>,
}

/// Queue double. `redrive_expired` treats every in-flight message as
/// expired, standing in for an elapsed visibility timeout; `drop_acks`
/// simulates an acknowledgment lost after processing.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    pub drop_acks: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.state.lock().unwrap().inflight.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        self.state.lock().unwrap().pending.push_back(Message {
            message_id: message_id.clone(),
            body: body.to_string(),
        });
        Ok(message_id)
    }

    async fn receive(&self, _wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let message = match state.pending.pop_front() {
            Some(m) => m,
            None => return Ok(None),
        };
        let receipt_handle = Uuid::new_v4().to_string();
        let count = state
            .receive_counts
            .entry(message.message_id.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let delivery = Delivery {
            message_id: message.message_id.clone(),
            receipt_handle: receipt_handle.clone(),
            receive_count: *count,
            body: message.body.clone(),
        };
        state.inflight.insert(receipt_handle, message);
        Ok(Some(delivery))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        if self.drop_acks.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.state.lock().unwrap().inflight.remove(receipt_handle);
        Ok(())
    }

    async fn redrive_expired(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().unwrap();
        let receipts: Vec<String> = state.inflight.keys().cloned().collect();
        let mut redriven = 0;
        for receipt in receipts {
            if let Some(message) = state.inflight.remove(&receipt) {
                state.pending.push_back(message);
                redriven += 1;
            }
        }
        Ok(redriven)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().unwrap().pending.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    docs: Mutex<HashMap<String, PredictionSummary>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn summary(&self, job_id: &str) -> Option<PredictionSummary> {
        self.docs.lock().unwrap().get(job_id).cloned()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, job_id: &str) -> Result<Option<PredictionSummary>, ResultStoreError> {
        Ok(self.docs.lock().unwrap().get(job_id).cloned())
    }

    async fn upsert(
        &self,
        job_id: &str,
        summary: &PredictionSummary,
    ) -> Result<(), ResultStoreError> {
        self.docs
            .lock()
            .unwrap()
            .insert(job_id.to_string(), summary.clone());
        Ok(())
    }
}

pub struct StubDetector {
    detections: Vec<Detection>,
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

impl StubDetector {
    pub fn returning(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        let stub = Self::returning(vec![]);
        stub.fail.store(true, Ordering::SeqCst);
        stub
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn detect(&self, _image: &[u8]) -> Result<DetectorOutput, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DetectorError::Api("stub detector offline".to_string()));
        }
        Ok(DetectorOutput {
            detections: self.detections.clone(),
            annotated_image: None,
        })
    }
}

/// Notifier double: same lookup-and-compose behavior as the HTTP notifier,
/// but records the composed messages instead of delivering them.
pub struct RecordingNotifier {
    results: Arc<dyn ResultStore>,
    pub sent: Mutex<Vec<(String, String, CompletionMessage)>>,
}

impl RecordingNotifier {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self {
            results,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_messages(&self) -> Vec<(String, String, CompletionMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, job_id: &str, recipient_id: &str) -> Result<(), NotifyError> {
        let summary = self.results.get(job_id).await?;
        let message = compose_message(summary.as_ref());
        self.sent
            .lock()
            .unwrap()
            .push((job_id.to_string(), recipient_id.to_string(), message));
        Ok(())
    }
}

pub fn cat_detection() -> Detection {
    Detection {
        class: "cat".to_string(),
        cx: 0.5,
        cy: 0.5,
        width: 0.2,
        height: 0.3,
        confidence: None,
    }
}

/// A real, decodable PNG so the annotation path runs against actual pixels.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([100, 100, 100]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub struct Harness {
    pub worker: Worker,
    pub producer: Producer,
    pub queue: Arc<InMemoryQueue>,
    pub store: Arc<InMemoryObjectStore>,
    pub results: Arc<InMemoryResultStore>,
    pub detector: Arc<StubDetector>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Another worker over the same collaborators, as in multi-instance
    /// scale-out against one queue.
    pub fn extra_worker(&self, settings: WorkerSettings) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.store.clone(),
            self.results.clone(),
            self.detector.clone(),
            self.notifier.clone(),
            settings,
        )
    }
}

pub fn harness(detector: StubDetector, settings: WorkerSettings) -> Harness {
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryObjectStore::new());
    let results = Arc::new(InMemoryResultStore::new());
    let detector = Arc::new(detector);
    let notifier = Arc::new(RecordingNotifier::new(results.clone()));

    let worker = Worker::new(
        queue.clone(),
        store.clone(),
        results.clone(),
        detector.clone(),
        notifier.clone(),
        settings,
    );
    let producer = Producer::new(queue.clone());

    Harness {
        worker,
        producer,
        queue,
        store,
        results,
        detector,
        notifier,
    }
}

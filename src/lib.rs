//! Asynchronous Object-Detection Pipeline
//!
//! This library implements the job pipeline behind an image object-detection
//! service: a producer enqueues detection jobs, a worker consumes them under
//! at-least-once delivery, downloads the source image from object storage,
//! runs detection, persists a prediction summary, uploads the annotated image
//! and notifies the front-end of the outcome.

pub mod config;
pub mod models;
pub mod producer;
pub mod services;
pub mod worker;

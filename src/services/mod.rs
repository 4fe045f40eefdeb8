pub mod detector;
pub mod notifier;
pub mod queue;
pub mod render;
pub mod results;
pub mod storage;

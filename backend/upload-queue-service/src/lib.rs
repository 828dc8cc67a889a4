//! Upload Queue Service
//!
//! Admission-controlled, priority-scheduled image upload queue. Uploads are
//! validated and classified into four priority bands, compressed with a
//! context-sensitive strategy, and handed to the external analysis pipeline
//! while lifecycle updates stream to subscribers. State is in-memory and
//! lost on restart; retries belong to callers.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
pub use services::UploadQueueService;

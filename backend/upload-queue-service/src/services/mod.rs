pub mod admission;
pub mod analysis;
pub mod compression;
pub mod notifications;
pub mod queue;
pub mod scheduler;

pub use analysis::{AnalysisClient, AnalysisRequest, HttpAnalysisClient};
pub use compression::{CompressionEngine, CompressionResult, CompressionStrategy, TargetFormat};
pub use notifications::{QueueUpdate, UpdateBroadcaster, UpdateType};
pub use queue::PriorityQueueSet;
pub use scheduler::{MetricsAggregator, UploadQueueService};

mod queue;
mod uploads;

pub use queue::{clear_queue, queue_health, queue_stats};
pub use uploads::{enqueue_upload, get_upload_status};

/// Data models for upload-queue-service
///
/// This module defines structures for:
/// - UploadRequest: inbound upload submissions
/// - UploadContext: per-upload state tracked through the pipeline
/// - Priority / UploadStatus: band and lifecycle enums
/// - Response payloads for the status, stats and health endpoints
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

// ========================================
// Priority bands
// ========================================

/// Priority band for an upload. Lower level = dispatched sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All bands in strict dispatch order
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Numeric level, 0 (urgent) through 3 (low)
    pub fn level(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Map a numeric level back to a band; levels above 3 clamp to low
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Urgent,
            1 => Self::High,
            2 => Self::Normal,
            _ => Self::Low,
        }
    }

    pub fn queue_name(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_queue_name(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Caller-supplied scheduling hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityHint {
    Urgent,
    Background,
}

// ========================================
// Upload lifecycle
// ========================================

/// Upload status in the pipeline lifecycle.
///
/// Transitions are one-directional: queued -> processing -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

// ========================================
// Requests
// ========================================

/// Inbound upload submission
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub user_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Image payload as a `data:image/...;base64,` URL
    pub image_data: String,
    #[serde(default)]
    pub is_keyboard_extension: bool,
    #[serde(default)]
    pub priority_hint: Option<PriorityHint>,
    /// Opaque parameters forwarded to the analysis pipeline untouched
    #[serde(default)]
    pub generation_params: Value,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Request metadata carried alongside the payload
#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    pub is_keyboard: bool,
    pub platform: String,
    pub user_agent: Option<String>,
}

/// Per-upload state, created at admission and owned by the worker that
/// processes it. Mutated only through `transition`.
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub upload_id: Uuid,
    pub user_id: String,
    pub correlation_id: Option<String>,
    pub priority: Priority,
    pub image_data: String,
    /// Estimated decoded payload size in bytes
    pub original_size: usize,
    pub generation_params: Value,
    pub metadata: UploadMetadata,
    pub status: UploadStatus,
    pub queued_at: DateTime<Utc>,
    /// Advisory processing deadline for this band
    pub timeout: Duration,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stream_id: Option<String>,
    pub error: Option<String>,
}

impl UploadContext {
    pub fn new(
        request: UploadRequest,
        priority: Priority,
        original_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            upload_id: Uuid::new_v4(),
            user_id: request.user_id,
            correlation_id: request.correlation_id,
            priority,
            image_data: request.image_data,
            original_size,
            generation_params: request.generation_params,
            metadata: UploadMetadata {
                is_keyboard: request.is_keyboard_extension,
                platform: request.platform.unwrap_or_else(|| "unknown".to_string()),
                user_agent: request.user_agent,
            },
            status: UploadStatus::Queued,
            queued_at: Utc::now(),
            timeout,
            processing_started_at: None,
            completed_at: None,
            stream_id: None,
            error: None,
        }
    }

    /// Advance the lifecycle. Invalid transitions are rejected and logged.
    pub fn transition(&mut self, next: UploadStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                upload_id = %self.upload_id,
                from = self.status.as_str(),
                to = next.as_str(),
                "Rejected invalid status transition"
            );
            false
        }
    }

    /// Copy used for status tracking; drops the payload so retained
    /// contexts do not pin image memory.
    pub fn without_payload(&self) -> Self {
        let mut copy = self.clone();
        copy.image_data = String::new();
        copy
    }
}

// ========================================
// Analysis hand-off
// ========================================

/// Depth of analysis requested downstream, derived from the upload's band
/// and origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStrategy {
    Fast,
    Standard,
    Comprehensive,
}

impl AnalysisStrategy {
    pub fn for_upload(priority: Priority, is_keyboard: bool) -> Self {
        match priority {
            Priority::Urgent => Self::Fast,
            Priority::High => Self::Standard,
            Priority::Low => Self::Comprehensive,
            Priority::Normal => {
                if is_keyboard {
                    Self::Fast
                } else {
                    Self::Standard
                }
            }
        }
    }
}

// ========================================
// Snapshots and responses
// ========================================

/// Per-band queue depths
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueDepths {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }

    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

/// Rolling counters maintained by the metrics aggregator
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_uploads: u64,
    pub processed_uploads: u64,
    pub failed_uploads: u64,
    pub total_processing_ms: u64,
    pub average_processing_ms: u64,
    pub compression_savings_bytes: u64,
    pub queue_depths: QueueDepths,
}

/// Returned by a successful admission
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub upload_id: Uuid,
    pub priority: u8,
    pub queue: &'static str,
    pub queue_position: usize,
    pub estimated_wait_ms: u64,
}

/// Point-in-time view of one upload for status queries
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatusResponse {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub queue_name: &'static str,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_ms: Option<u64>,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// Operational snapshot for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsResponse {
    pub active_workers: usize,
    pub max_concurrent: usize,
    pub queue_depths: QueueDepths,
    pub total_queued: usize,
    pub tracked_uploads: usize,
    pub metrics: MetricsSnapshot,
    pub config: QueueConfigSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueConfigSummary {
    pub max_image_dimension: u32,
    pub compression_quality: u8,
    pub max_file_size_bytes: usize,
}

/// Operational snapshot for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatusResponse {
    pub status: &'static str,
    pub active_workers: usize,
    pub total_queued: usize,
    pub max_capacity: usize,
    pub utilization_percent: u32,
    pub metrics: MetricsSnapshot,
    pub uptime_secs: u64,
}

//! Upload queue service - admission, strict-priority dispatch, and the
//! per-upload processing pipeline
//!
//! A single dispatcher loop is the only consumer of the queues: it wakes on
//! enqueue signals or a fixed tick, and while worker slots are free it pops
//! the highest non-empty band and spawns a worker for the item. Workers run
//! compress -> analysis hand-off -> finalize, reporting lifecycle events
//! through the broadcaster. There is no aging across bands; sustained
//! urgent/high traffic starves the low band, which is the intended
//! trade-off.
//!
//! Per-band timeouts are advisory: they are forwarded downstream and never
//! enforced here. An upload that hangs inside compression or dispatch is
//! not cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::models::{
    AnalysisStrategy, HealthStatusResponse, MetricsSnapshot, Priority, QueueConfigSummary,
    QueueDepths, QueueStatsResponse, UploadContext, UploadReceipt, UploadRequest, UploadStatus,
    UploadStatusResponse,
};

use super::admission;
use super::analysis::{AnalysisClient, AnalysisRequest};
use super::compression::{CompressionEngine, CompressionResult};
use super::notifications::{QueueUpdate, UpdateBroadcaster, UpdateType};
use super::queue::PriorityQueueSet;

/// Assumed processing time before any upload has completed
const DEFAULT_AVG_PROCESSING_MS: u64 = 5_000;
/// Total backlog below which the service reports healthy
const HEALTHY_BACKLOG_LIMIT: usize = 80;

/// Rolling operational counters. A passive observer: dispatch decisions
/// never read it, except for the wait-time estimate shown to callers.
#[derive(Default)]
pub struct MetricsAggregator {
    total_uploads: AtomicU64,
    processed_uploads: AtomicU64,
    failed_uploads: AtomicU64,
    total_processing_ms: AtomicU64,
    compression_savings_bytes: AtomicU64,
    depth_urgent: AtomicUsize,
    depth_high: AtomicUsize,
    depth_normal: AtomicUsize,
    depth_low: AtomicUsize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, depths: &QueueDepths) {
        self.total_uploads.fetch_add(1, Ordering::Relaxed);
        self.set_queue_depths(depths);
    }

    pub fn record_processed(&self, elapsed: Duration, saved_bytes: u64) {
        self.processed_uploads.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.compression_savings_bytes
            .fetch_add(saved_bytes, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depths(&self, depths: &QueueDepths) {
        self.depth_urgent.store(depths.urgent, Ordering::Relaxed);
        self.depth_high.store(depths.high, Ordering::Relaxed);
        self.depth_normal.store(depths.normal, Ordering::Relaxed);
        self.depth_low.store(depths.low, Ordering::Relaxed);
    }

    pub fn average_processing_ms(&self) -> u64 {
        let processed = self.processed_uploads.load(Ordering::Relaxed);
        if processed == 0 {
            0
        } else {
            self.total_processing_ms.load(Ordering::Relaxed) / processed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_uploads: self.total_uploads.load(Ordering::Relaxed),
            processed_uploads: self.processed_uploads.load(Ordering::Relaxed),
            failed_uploads: self.failed_uploads.load(Ordering::Relaxed),
            total_processing_ms: self.total_processing_ms.load(Ordering::Relaxed),
            average_processing_ms: self.average_processing_ms(),
            compression_savings_bytes: self.compression_savings_bytes.load(Ordering::Relaxed),
            queue_depths: QueueDepths {
                urgent: self.depth_urgent.load(Ordering::Relaxed),
                high: self.depth_high.load(Ordering::Relaxed),
                normal: self.depth_normal.load(Ordering::Relaxed),
                low: self.depth_low.load(Ordering::Relaxed),
            },
        }
    }
}

/// The upload queue: admission in, analysis hand-off out
pub struct UploadQueueService {
    config: Config,
    queues: Mutex<PriorityQueueSet>,
    /// In-flight and recently terminal contexts, payload stripped, kept for
    /// status queries until eviction
    tracked: Arc<RwLock<HashMap<Uuid, UploadContext>>>,
    active_workers: AtomicUsize,
    compression: Arc<CompressionEngine>,
    analysis: Arc<dyn AnalysisClient>,
    broadcaster: UpdateBroadcaster,
    metrics: MetricsAggregator,
    wake: Notify,
    started_at: Instant,
}

/// Releases a worker slot when the worker finishes, panicked or not
struct WorkerSlot {
    service: Arc<UploadQueueService>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let remaining = self.service.active_workers.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_active_workers(remaining);
        self.service.wake.notify_one();
    }
}

impl UploadQueueService {
    pub fn new(config: Config, analysis: Arc<dyn AnalysisClient>) -> Self {
        let queues = PriorityQueueSet::new(config.queue.max_queue_size);
        let compression = Arc::new(CompressionEngine::new(config.compression.clone()));

        info!(
            max_concurrent = config.queue.max_concurrent,
            max_queue_size = config.queue.max_queue_size,
            compression_quality = config.compression.quality,
            max_image_dimension = config.compression.max_dimension,
            "Upload queue service initialized"
        );

        Self {
            config,
            queues: Mutex::new(queues),
            tracked: Arc::new(RwLock::new(HashMap::new())),
            active_workers: AtomicUsize::new(0),
            compression,
            analysis,
            broadcaster: UpdateBroadcaster::new(),
            metrics: MetricsAggregator::new(),
            wake: Notify::new(),
            started_at: Instant::now(),
        }
    }

    /// Outbound lifecycle channel; external transports subscribe here
    pub fn updates(&self) -> &UpdateBroadcaster {
        &self.broadcaster
    }

    // ========================================
    // Admission
    // ========================================

    /// Validate, classify and enqueue an upload.
    ///
    /// Synchronous failures (`Validation`, `Capacity`) leave the service
    /// untouched. On success the dispatcher is woken and the caller gets
    /// the upload id plus its queue position and estimated wait.
    pub async fn add_upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        admission::validate_upload(&request, self.config.queue.max_file_size_bytes)?;

        let original_size = admission::estimated_decoded_size(&request.image_data);

        let mut queues = self.queues.lock().await;
        let priority = admission::determine_priority(
            &request,
            queues.total_len(),
            self.config.queue.high_water_mark,
        );
        let timeout = self.config.queue.timeouts.for_priority(priority);

        let context = UploadContext::new(request, priority, original_size, timeout);
        let upload_id = context.upload_id;
        let user_id = context.user_id.clone();
        let correlation_id = context.correlation_id.clone();

        let position = queues.enqueue(context)?;
        let depths = queues.depths();
        drop(queues);

        self.metrics.record_enqueued(&depths);
        metrics::observe_enqueued(priority.queue_name());
        metrics::set_queue_depths(&depths);

        let estimated_wait_ms = self.estimate_wait_ms(position);

        info!(
            %upload_id,
            user_id = %user_id,
            priority = priority.level(),
            queue = priority.queue_name(),
            original_size,
            queue_position = position,
            "Upload added to queue"
        );

        self.send_update(
            &user_id,
            correlation_id,
            upload_id,
            UpdateType::Queued,
            json!({
                "priority": priority.level(),
                "queue": priority.queue_name(),
                "queue_position": position,
                "estimated_wait_ms": estimated_wait_ms,
            }),
        )
        .await;

        self.wake.notify_one();

        Ok(UploadReceipt {
            upload_id,
            priority: priority.level(),
            queue: priority.queue_name(),
            queue_position: position,
            estimated_wait_ms,
        })
    }

    // ========================================
    // Dispatch
    // ========================================

    /// Dispatcher loop. Runs until the shutdown flag flips; wakes on
    /// enqueue or every tick interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.queue.tick_interval());

        info!(
            max_concurrent = self.config.queue.max_concurrent,
            tick_interval_ms = self.config.queue.tick_interval_ms,
            "Upload dispatcher started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = tick.tick() => {}
            }

            Arc::clone(&self).dispatch_ready().await;
        }

        info!("Upload dispatcher stopped");
    }

    /// Fill free worker slots from the highest non-empty bands
    async fn dispatch_ready(self: Arc<Self>) {
        loop {
            if self.active_workers.load(Ordering::Acquire) >= self.config.queue.max_concurrent {
                break;
            }

            let (mut context, depths) = {
                let mut queues = self.queues.lock().await;
                match queues.pop_next() {
                    Some(context) => (context, queues.depths()),
                    None => break,
                }
            };

            self.metrics.set_queue_depths(&depths);
            metrics::set_queue_depths(&depths);

            let active = self.active_workers.fetch_add(1, Ordering::AcqRel) + 1;
            metrics::set_active_workers(active);

            // Stamp on dequeue so status queries never lose sight of the
            // upload between queue and worker
            context.transition(UploadStatus::Processing);
            context.processing_started_at = Some(Utc::now());
            self.track(&context).await;

            let service = Arc::clone(&self);
            tokio::spawn(async move {
                service.process_upload(context).await;
            });
        }
    }

    /// Per-upload pipeline: compress, hand off to analysis, finalize.
    ///
    /// Everything in here is caught at the item boundary; a failing upload
    /// reports `failed` and releases its slot without touching siblings.
    async fn process_upload(self: Arc<Self>, mut context: UploadContext) {
        let _slot = WorkerSlot {
            service: Arc::clone(&self),
        };
        let processing_started = Instant::now();

        info!(
            upload_id = %context.upload_id,
            user_id = %context.user_id,
            queue = context.priority.queue_name(),
            active_workers = self.active_workers.load(Ordering::Acquire),
            "Upload processing started"
        );

        self.emit(
            &context,
            UpdateType::ProcessingStarted,
            json!({ "estimated_duration_ms": context.timeout.as_millis() as u64 }),
        )
        .await;

        // Phase 1: compression. Degradations surface as a passthrough
        // result; they never fail the upload.
        let compression = match self
            .compression
            .clone()
            .compress_async(context.clone())
            .await
        {
            Ok(result) => result,
            Err(err) => CompressionResult::passthrough(&context, Some(err.to_string())),
        };
        if let Some(reason) = &compression.error {
            warn!(
                upload_id = %context.upload_id,
                reason = %reason,
                "Forwarding uncompressed payload"
            );
        }
        // The compression result carries the payload from here on
        context.image_data = String::new();

        self.emit(
            &context,
            UpdateType::Progress,
            json!({
                "phase": "compression",
                "progress": 30,
                "compression_ratio": compression.compression_ratio,
                "space_saved": compression.space_saved,
            }),
        )
        .await;

        // Phase 2: hand off to the analysis pipeline. Our responsibility
        // ends once the stream handle comes back.
        let analysis_request = AnalysisRequest {
            user_id: context.user_id.clone(),
            correlation_id: context.correlation_id.clone(),
            image_data: compression.compressed_image_data.clone(),
            generation_params: context.generation_params.clone(),
            priority: context.priority,
            strategy: AnalysisStrategy::for_upload(context.priority, context.metadata.is_keyboard),
            is_keyboard_extension: context.metadata.is_keyboard,
            timeout_ms: context.timeout.as_millis() as u64,
        };

        match self.analysis.start_analysis(analysis_request).await {
            Ok(stream_id) => {
                self.emit(
                    &context,
                    UpdateType::Progress,
                    json!({ "phase": "analysis", "progress": 50, "stream_id": stream_id }),
                )
                .await;

                let elapsed = processing_started.elapsed();
                context.transition(UploadStatus::Completed);
                context.completed_at = Some(Utc::now());
                context.stream_id = Some(stream_id.clone());
                self.track(&context).await;

                self.metrics
                    .record_processed(elapsed, compression.space_saved as u64);
                metrics::observe_processed(elapsed, compression.space_saved as u64);

                info!(
                    upload_id = %context.upload_id,
                    user_id = %context.user_id,
                    stream_id = %stream_id,
                    processing_time_ms = elapsed.as_millis() as u64,
                    compression_ratio = compression.compression_ratio,
                    "Upload processing completed"
                );

                self.emit(
                    &context,
                    UpdateType::Completed,
                    json!({
                        "stream_id": stream_id,
                        "processing_time_ms": elapsed.as_millis() as u64,
                        "compression_ratio": compression.compression_ratio,
                        "original_size": compression.original_size,
                        "compressed_size": compression.compressed_size,
                    }),
                )
                .await;
            }
            Err(err) => {
                let elapsed = processing_started.elapsed();
                context.transition(UploadStatus::Failed);
                context.error = Some(err.to_string());
                self.track(&context).await;

                self.metrics.record_failed();
                metrics::observe_failed(elapsed);

                error!(
                    upload_id = %context.upload_id,
                    user_id = %context.user_id,
                    error = %err,
                    processing_time_ms = elapsed.as_millis() as u64,
                    "Upload processing failed"
                );

                self.emit(
                    &context,
                    UpdateType::Failed,
                    json!({
                        "error": err.to_string(),
                        "processing_time_ms": elapsed.as_millis() as u64,
                    }),
                )
                .await;
            }
        }

        self.schedule_eviction(context.upload_id);
    }

    // ========================================
    // Queries
    // ========================================

    /// Read-only status lookup. Returns `None` for unknown ids and for
    /// terminal uploads past their retention window.
    pub async fn get_upload_status(&self, upload_id: Uuid) -> Option<UploadStatusResponse> {
        if let Some(context) = self.tracked.read().await.get(&upload_id) {
            let elapsed_ms = context
                .processing_started_at
                .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64);
            return Some(UploadStatusResponse {
                upload_id,
                status: context.status,
                queue_name: context.priority.queue_name(),
                priority: context.priority.level(),
                queue_position: None,
                estimated_wait_ms: None,
                queued_at: context.queued_at,
                processing_started_at: context.processing_started_at,
                stream_id: context.stream_id.clone(),
                error: context.error.clone(),
                elapsed_ms,
            });
        }

        let queues = self.queues.lock().await;
        queues.find(upload_id).map(|(position, context)| {
            UploadStatusResponse {
                upload_id,
                status: UploadStatus::Queued,
                queue_name: context.priority.queue_name(),
                priority: context.priority.level(),
                queue_position: Some(position),
                estimated_wait_ms: Some(self.estimate_wait_ms(position)),
                queued_at: context.queued_at,
                processing_started_at: None,
                stream_id: None,
                error: None,
                elapsed_ms: None,
            }
        })
    }

    pub async fn get_queue_stats(&self) -> QueueStatsResponse {
        let depths = self.queues.lock().await.depths();
        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_depths = depths;

        QueueStatsResponse {
            active_workers: self.active_workers.load(Ordering::Acquire),
            max_concurrent: self.config.queue.max_concurrent,
            queue_depths: depths,
            total_queued: depths.total(),
            tracked_uploads: self.tracked.read().await.len(),
            metrics: snapshot,
            config: QueueConfigSummary {
                max_image_dimension: self.config.compression.max_dimension,
                compression_quality: self.config.compression.quality,
                max_file_size_bytes: self.config.queue.max_file_size_bytes,
            },
        }
    }

    pub async fn get_health_status(&self) -> HealthStatusResponse {
        let depths = self.queues.lock().await.depths();
        let total_queued = depths.total();
        let active_workers = self.active_workers.load(Ordering::Acquire);
        let max_capacity = (self.config.queue.max_queue_size * Priority::ALL.len()).max(1);
        let healthy = total_queued < HEALTHY_BACKLOG_LIMIT
            && active_workers <= self.config.queue.max_concurrent;

        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_depths = depths;

        HealthStatusResponse {
            status: if healthy { "healthy" } else { "overloaded" },
            active_workers,
            total_queued,
            max_capacity,
            utilization_percent: ((total_queued as f64 / max_capacity as f64) * 100.0).round()
                as u32,
            metrics: snapshot,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Drop queued (not in-flight) uploads from one band, or all bands
    pub async fn clear_queue(&self, band: Option<Priority>) -> usize {
        let (removed, depths) = {
            let mut queues = self.queues.lock().await;
            let removed = queues.clear(band);
            (removed, queues.depths())
        };

        self.metrics.set_queue_depths(&depths);
        metrics::set_queue_depths(&depths);

        match band {
            Some(priority) => {
                warn!(queue = priority.queue_name(), removed, "Upload queue cleared")
            }
            None => warn!(removed, "All upload queues cleared"),
        }

        removed
    }

    /// Wait for in-flight uploads to drain, then discard remaining state.
    /// Call after stopping the dispatcher loop.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("Shutting down upload queue service");

        let deadline = Instant::now() + timeout;
        while self.active_workers.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            debug!(
                active_workers = self.active_workers.load(Ordering::Acquire),
                "Waiting for active uploads to complete"
            );
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        self.clear_queue(None).await;
        self.tracked.write().await.clear();

        info!("Upload queue service shutdown complete");
    }

    // ========================================
    // Internals
    // ========================================

    fn estimate_wait_ms(&self, position: usize) -> u64 {
        let average = match self.metrics.average_processing_ms() {
            0 => DEFAULT_AVG_PROCESSING_MS,
            avg => avg,
        };
        let active = self.active_workers.load(Ordering::Acquire);
        let idle_slots = self
            .config
            .queue
            .max_concurrent
            .saturating_sub(active)
            .max(1);

        (position as u64).saturating_mul(average) / idle_slots as u64
    }

    /// Record the current view of an upload for status queries
    async fn track(&self, context: &UploadContext) {
        self.tracked
            .write()
            .await
            .insert(context.upload_id, context.without_payload());
    }

    fn schedule_eviction(&self, upload_id: Uuid) {
        let tracked = Arc::clone(&self.tracked);
        let retention = self.config.queue.retention();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            tracked.write().await.remove(&upload_id);
        });
    }

    async fn emit(&self, context: &UploadContext, update_type: UpdateType, payload: Value) {
        self.send_update(
            &context.user_id,
            context.correlation_id.clone(),
            context.upload_id,
            update_type,
            payload,
        )
        .await;
    }

    async fn send_update(
        &self,
        user_id: &str,
        correlation_id: Option<String>,
        upload_id: Uuid,
        update_type: UpdateType,
        payload: Value,
    ) {
        let update = QueueUpdate {
            upload_id,
            update_type,
            timestamp: Utc::now(),
            correlation_id,
            payload,
        };
        self.broadcaster.send_to_user(user_id, update).await;
    }
}

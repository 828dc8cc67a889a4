use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    TextEncoder,
};

use crate::models::QueueDepths;

static UPLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "upload_queue_uploads_total",
            "Total uploads admitted, by priority band",
        ),
        &["queue"],
    )
    .expect("failed to create upload_queue_uploads_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register upload_queue_uploads_total");
    counter
});

static UPLOADS_PROCESSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "upload_queue_uploads_processed_total",
        "Uploads that completed processing",
    )
    .expect("failed to create upload_queue_uploads_processed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register upload_queue_uploads_processed_total");
    counter
});

static UPLOADS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "upload_queue_uploads_failed_total",
        "Uploads that failed during processing",
    )
    .expect("failed to create upload_queue_uploads_failed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register upload_queue_uploads_failed_total");
    counter
});

static ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "upload_queue_active_workers",
        "Uploads currently being processed",
    )
    .expect("failed to create upload_queue_active_workers");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register upload_queue_active_workers");
    gauge
});

static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "upload_queue_depth",
            "Queued uploads per priority band",
        ),
        &["queue"],
    )
    .expect("failed to create upload_queue_depth");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register upload_queue_depth");
    gauge
});

static PROCESSING_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "upload_queue_processing_duration_seconds",
            "Per-upload pipeline latency from dispatch to terminal status",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("failed to create upload_queue_processing_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register upload_queue_processing_duration_seconds");
    histogram
});

static COMPRESSION_SAVED_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "upload_queue_compression_saved_bytes_total",
        "Cumulative bytes saved by payload compression",
    )
    .expect("failed to create upload_queue_compression_saved_bytes_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register upload_queue_compression_saved_bytes_total");
    counter
});

pub fn observe_enqueued(queue: &str) {
    UPLOADS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn observe_processed(elapsed: Duration, saved_bytes: u64) {
    UPLOADS_PROCESSED_TOTAL.inc();
    PROCESSING_DURATION_SECONDS.observe(elapsed.as_secs_f64());
    COMPRESSION_SAVED_BYTES_TOTAL.inc_by(saved_bytes);
}

pub fn observe_failed(elapsed: Duration) {
    UPLOADS_FAILED_TOTAL.inc();
    PROCESSING_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn set_active_workers(count: usize) {
    ACTIVE_WORKERS.set(count as i64);
}

pub fn set_queue_depths(depths: &QueueDepths) {
    QUEUE_DEPTH
        .with_label_values(&["urgent"])
        .set(depths.urgent as i64);
    QUEUE_DEPTH
        .with_label_values(&["high"])
        .set(depths.high as i64);
    QUEUE_DEPTH
        .with_label_values(&["normal"])
        .set(depths.normal as i64);
    QUEUE_DEPTH.with_label_values(&["low"]).set(depths.low as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

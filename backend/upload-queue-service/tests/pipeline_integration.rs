//! End-to-end pipeline tests: admission through dispatch to terminal status
//!
//! The analysis collaborator is mocked so the full lifecycle (queue ->
//! compress -> hand-off -> finalize) runs in-process.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use upload_queue_service::config::{
    AnalysisConfig, AppConfig, BandTimeouts, CompressionConfig, Config, QueueConfig,
};
use upload_queue_service::error::{AppError, Result};
use upload_queue_service::models::{PriorityHint, UploadRequest, UploadStatus};
use upload_queue_service::services::{
    AnalysisClient, AnalysisRequest, QueueUpdate, UpdateType, UploadQueueService,
};

struct MockAnalysisClient {
    requests: Mutex<Vec<AnalysisRequest>>,
    fail: bool,
    delay: Duration,
    counter: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockAnalysisClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: false,
            delay: Duration::ZERO,
            counter: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
            delay: Duration::ZERO,
            counter: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: false,
            delay,
            counter: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnalysisClient for MockAnalysisClient {
    async fn start_analysis(&self, request: AnalysisRequest) -> Result<String> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.requests.lock().await.push(request);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(AppError::Internal("analysis unavailable".to_string()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stream-{n}"))
    }
}

fn test_config(max_concurrent: usize, max_queue_size: usize) -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            env: "test".to_string(),
        },
        queue: QueueConfig {
            max_concurrent,
            max_queue_size,
            max_file_size_bytes: 5 * 1024 * 1024,
            high_water_mark: 50,
            tick_interval_ms: 10,
            retention_secs: 30,
            timeouts: BandTimeouts::default(),
        },
        compression: CompressionConfig::default(),
        analysis: AnalysisConfig {
            base_url: "http://localhost:0".to_string(),
        },
    }
}

fn start_dispatcher(
    service: &Arc<UploadQueueService>,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(service.clone().run(rx));
    (tx, handle)
}

/// PNG full of pseudo-random noise so lossy re-encoding reliably shrinks it
fn noisy_png_data_url(width: u32, height: u32) -> String {
    let mut img = image::RgbImage::new(width, height);
    let mut seed: u32 = 0x9e37_79b9;
    for pixel in img.pixels_mut() {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *pixel = image::Rgb([(seed >> 8) as u8, (seed >> 16) as u8, (seed >> 24) as u8]);
    }
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", BASE64.encode(&buf))
}

fn upload_request(user_id: &str) -> UploadRequest {
    UploadRequest {
        user_id: user_id.to_string(),
        correlation_id: Some(format!("corr-{user_id}")),
        image_data: noisy_png_data_url(64, 64),
        is_keyboard_extension: false,
        priority_hint: None,
        generation_params: serde_json::json!({ "tone": "playful" }),
        platform: Some("ios".to_string()),
        user_agent: None,
    }
}

async fn wait_for_terminal(service: &UploadQueueService, upload_id: Uuid) -> UploadStatus {
    for _ in 0..500 {
        if let Some(status) = service.get_upload_status(upload_id).await {
            if status.status.is_terminal() {
                return status.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {upload_id} never reached a terminal status");
}

async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<QueueUpdate>,
) -> Vec<QueueUpdate> {
    let mut updates = Vec::new();
    loop {
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a queue update")
            .expect("update channel closed");
        let update_type = update.update_type;
        updates.push(update);
        if matches!(update_type, UpdateType::Completed | UpdateType::Failed) {
            return updates;
        }
    }
}

#[tokio::test]
async fn test_upload_completes_end_to_end() {
    let mock = MockAnalysisClient::new();
    let service = Arc::new(UploadQueueService::new(test_config(2, 100), mock.clone()));
    let mut updates_rx = service.updates().subscribe("user-1").await;
    let (shutdown, dispatcher) = start_dispatcher(&service);

    let receipt = service.add_upload(upload_request("user-1")).await.unwrap();
    assert_eq!(wait_for_terminal(&service, receipt.upload_id).await, UploadStatus::Completed);

    let status = service.get_upload_status(receipt.upload_id).await.unwrap();
    assert_eq!(status.stream_id.as_deref(), Some("stream-0"));
    assert!(status.elapsed_ms.is_some());

    let updates = collect_until_terminal(&mut updates_rx).await;
    let sequence: Vec<UpdateType> = updates.iter().map(|u| u.update_type).collect();
    assert_eq!(
        sequence,
        vec![
            UpdateType::Queued,
            UpdateType::ProcessingStarted,
            UpdateType::Progress,
            UpdateType::Progress,
            UpdateType::Completed,
        ]
    );
    // Every update carries the id and correlation id
    assert!(updates.iter().all(|u| u.upload_id == receipt.upload_id));
    assert!(updates
        .iter()
        .all(|u| u.correlation_id.as_deref() == Some("corr-user-1")));

    // The hand-off carried the compressed payload and queue context
    let requests = mock.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].image_data.starts_with("data:image/"));
    assert_eq!(requests[0].timeout_ms, 5_000); // small payload lands in high

    let _ = shutdown.send(true);
    let _ = dispatcher.await;
}

#[tokio::test]
async fn test_urgent_dispatches_before_earlier_uploads() {
    let mock = MockAnalysisClient::slow(Duration::from_millis(20));
    let service = Arc::new(UploadQueueService::new(test_config(1, 100), mock.clone()));

    // Admit before the dispatcher starts so ordering is decided by the
    // queue, not by arrival time
    let first = service.add_upload(upload_request("first")).await.unwrap();
    let second = service.add_upload(upload_request("second")).await.unwrap();
    let mut urgent_request = upload_request("urgent");
    urgent_request.priority_hint = Some(PriorityHint::Urgent);
    let urgent = service.add_upload(urgent_request).await.unwrap();

    let (shutdown, dispatcher) = start_dispatcher(&service);
    for receipt in [&first, &second, &urgent] {
        assert_eq!(
            wait_for_terminal(&service, receipt.upload_id).await,
            UploadStatus::Completed
        );
    }

    let order: Vec<String> = mock
        .requests
        .lock()
        .await
        .iter()
        .map(|r| r.user_id.clone())
        .collect();
    // Urgent preempts; the two same-band uploads stay FIFO
    assert_eq!(order, vec!["urgent", "first", "second"]);

    let _ = shutdown.send(true);
    let _ = dispatcher.await;
}

#[tokio::test]
async fn test_worker_cap_is_never_exceeded() {
    let mock = MockAnalysisClient::slow(Duration::from_millis(50));
    let service = Arc::new(UploadQueueService::new(test_config(2, 100), mock.clone()));

    let mut receipts = Vec::new();
    for i in 0..6 {
        receipts.push(
            service
                .add_upload(upload_request(&format!("user-{i}")))
                .await
                .unwrap(),
        );
    }

    let (shutdown, dispatcher) = start_dispatcher(&service);
    for receipt in &receipts {
        assert_eq!(
            wait_for_terminal(&service, receipt.upload_id).await,
            UploadStatus::Completed
        );
    }

    assert!(mock.peak_active.load(Ordering::SeqCst) <= 2);

    let stats = service.get_queue_stats().await;
    assert_eq!(stats.metrics.processed_uploads, 6);
    assert_eq!(stats.total_queued, 0);

    let _ = shutdown.send(true);
    let _ = dispatcher.await;
}

#[tokio::test]
async fn test_dispatch_failure_marks_upload_failed() {
    let mock = MockAnalysisClient::failing();
    let service = Arc::new(UploadQueueService::new(test_config(2, 100), mock));
    let mut updates_rx = service.updates().subscribe("user-1").await;
    let (shutdown, dispatcher) = start_dispatcher(&service);

    let receipt = service.add_upload(upload_request("user-1")).await.unwrap();
    assert_eq!(wait_for_terminal(&service, receipt.upload_id).await, UploadStatus::Failed);

    let status = service.get_upload_status(receipt.upload_id).await.unwrap();
    assert!(status.error.as_deref().unwrap().contains("analysis unavailable"));
    assert!(status.stream_id.is_none());

    let updates = collect_until_terminal(&mut updates_rx).await;
    let last = updates.last().unwrap();
    assert_eq!(last.update_type, UpdateType::Failed);
    assert!(last.payload["error"]
        .as_str()
        .unwrap()
        .contains("analysis unavailable"));

    let stats = service.get_queue_stats().await;
    assert_eq!(stats.metrics.failed_uploads, 1);
    assert_eq!(stats.metrics.processed_uploads, 0);

    let _ = shutdown.send(true);
    let _ = dispatcher.await;
}

#[tokio::test]
async fn test_compression_failure_still_completes() {
    let mock = MockAnalysisClient::new();
    let service = Arc::new(UploadQueueService::new(test_config(2, 100), mock.clone()));
    let mut updates_rx = service.updates().subscribe("user-1").await;
    let (shutdown, dispatcher) = start_dispatcher(&service);

    // Valid base64, but not a decodable image: compression degrades to
    // passthrough and the upload still completes
    let mut request = upload_request("user-1");
    request.image_data = format!("data:image/png;base64,{}", BASE64.encode([0u8; 256]));
    let original_payload = request.image_data.clone();

    let receipt = service.add_upload(request).await.unwrap();
    assert_eq!(wait_for_terminal(&service, receipt.upload_id).await, UploadStatus::Completed);

    let updates = collect_until_terminal(&mut updates_rx).await;
    let compression_update = updates
        .iter()
        .find(|u| u.update_type == UpdateType::Progress && u.payload["phase"] == "compression")
        .unwrap();
    assert_eq!(compression_update.payload["compression_ratio"], 0);

    // The original payload went downstream untouched
    let requests = mock.requests.lock().await;
    assert_eq!(requests[0].image_data, original_payload);

    let _ = shutdown.send(true);
    let _ = dispatcher.await;
}

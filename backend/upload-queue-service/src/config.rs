/// Configuration management for upload-queue-service
///
/// Loads configuration from environment variables with sensible defaults.
/// All knobs are fixed at construction; the running service never re-reads
/// the environment.
use std::time::Duration;

use serde::Deserialize;

use crate::models::Priority;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub queue: QueueConfig,
    pub compression: CompressionConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    /// Max concurrently processing uploads
    pub max_concurrent: usize,
    /// Max items per priority queue
    pub max_queue_size: usize,
    /// Max accepted decoded payload size in bytes
    pub max_file_size_bytes: usize,
    /// Total queued items above which admission demotes priority one level
    pub high_water_mark: usize,
    /// Dispatcher tick cadence in milliseconds
    pub tick_interval_ms: u64,
    /// How long terminal contexts stay queryable, in seconds
    pub retention_secs: u64,
    /// Advisory per-band processing timeouts
    pub timeouts: BandTimeouts,
}

/// Advisory SLA hints per priority band, in milliseconds.
///
/// These are attached to each upload and forwarded downstream; the queue
/// itself never cancels in-flight work when one elapses.
#[derive(Clone, Debug, Deserialize)]
pub struct BandTimeouts {
    pub urgent_ms: u64,
    pub high_ms: u64,
    pub normal_ms: u64,
    pub low_ms: u64,
}

impl BandTimeouts {
    pub fn for_priority(&self, priority: Priority) -> Duration {
        let ms = match priority {
            Priority::Urgent => self.urgent_ms,
            Priority::High => self.high_ms,
            Priority::Normal => self.normal_ms,
            Priority::Low => self.low_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for BandTimeouts {
    fn default() -> Self {
        Self {
            urgent_ms: 2_000,
            high_ms: 5_000,
            normal_ms: 10_000,
            low_ms: 30_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 100,
            max_file_size_bytes: 5 * 1024 * 1024,
            high_water_mark: 50,
            tick_interval_ms: 100,
            retention_secs: 30,
            timeouts: BandTimeouts::default(),
        }
    }
}

impl QueueConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompressionConfig {
    /// Default lossy quality (0-100)
    pub quality: u8,
    /// Max width/height in pixels; larger images are downscaled
    pub max_dimension: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            quality: 80,
            max_dimension: 1920,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the downstream analysis service
    pub base_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                host: std::env::var("UPLOAD_QUEUE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("UPLOAD_QUEUE_PORT")
                    .unwrap_or_else(|_| "8086".to_string())
                    .parse()
                    .unwrap_or(8086),
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            },
            queue: QueueConfig {
                max_concurrent: env_parse("UPLOAD_QUEUE_MAX_CONCURRENT", 5),
                max_queue_size: env_parse("UPLOAD_QUEUE_MAX_QUEUE_SIZE", 100),
                max_file_size_bytes: env_parse("UPLOAD_MAX_FILE_SIZE_BYTES", 5 * 1024 * 1024),
                high_water_mark: env_parse("UPLOAD_QUEUE_HIGH_WATER_MARK", 50),
                tick_interval_ms: env_parse("UPLOAD_QUEUE_TICK_INTERVAL_MS", 100),
                retention_secs: env_parse("UPLOAD_QUEUE_RETENTION_SECS", 30),
                timeouts: BandTimeouts {
                    urgent_ms: env_parse("UPLOAD_TIMEOUT_URGENT_MS", 2_000),
                    high_ms: env_parse("UPLOAD_TIMEOUT_HIGH_MS", 5_000),
                    normal_ms: env_parse("UPLOAD_TIMEOUT_NORMAL_MS", 10_000),
                    low_ms: env_parse("UPLOAD_TIMEOUT_LOW_MS", 30_000),
                },
            },
            compression: CompressionConfig {
                quality: env_parse("UPLOAD_COMPRESSION_QUALITY", 80),
                max_dimension: env_parse("UPLOAD_MAX_IMAGE_DIMENSION", 1920),
            },
            analysis: AnalysisConfig {
                base_url: std::env::var("ANALYSIS_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8087".to_string()),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

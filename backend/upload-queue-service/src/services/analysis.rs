/// Downstream analysis dispatch
///
/// The queue's responsibility ends at hand-off: it forwards the compressed
/// payload plus generation parameters and receives a stream handle back.
/// Analysis continues asynchronously outside this service's lifetime.
/// The client is injected at construction so the scheduler stays free of
/// transport concerns (and of the upstream module cycle this replaces).
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AnalysisConfig;
use crate::error::{AppError, Result};
use crate::models::{AnalysisStrategy, Priority};

/// Hand-off payload for the analysis pipeline
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Compressed image payload as a data-URL
    pub image_data: String,
    pub generation_params: Value,
    /// Originating queue band, forwarded as scheduling context
    pub priority: Priority,
    pub strategy: AnalysisStrategy,
    pub is_keyboard_extension: bool,
    /// Advisory deadline; enforcement is the collaborator's concern
    pub timeout_ms: u64,
}

/// Entry point into the external analysis pipeline
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Start analysis for one upload; returns the stream handle that tracks
    /// the work from here on
    async fn start_analysis(&self, request: AnalysisRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct StreamStarted {
    stream_id: String,
}

/// HTTP client for the analysis service
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn start_analysis(&self, request: AnalysisRequest) -> Result<String> {
        let url = format!("{}/api/v1/streams", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("analysis dispatch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "analysis service returned {}",
                response.status()
            )));
        }

        let started: StreamStarted = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("invalid analysis response: {e}")))?;

        Ok(started.stream_id)
    }
}

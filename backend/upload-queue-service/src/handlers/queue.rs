/// Queue handlers - operational snapshots and maintenance
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::Priority;
use crate::services::UploadQueueService;

/// Queue statistics snapshot
pub async fn queue_stats(
    service: web::Data<Arc<UploadQueueService>>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(service.get_queue_stats().await))
}

/// Health snapshot for ops probes
pub async fn queue_health(
    service: web::Data<Arc<UploadQueueService>>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(service.get_health_status().await))
}

/// Drop queued uploads from one band, or from every band via `all`
pub async fn clear_queue(
    service: web::Data<Arc<UploadQueueService>>,
    queue_name: web::Path<String>,
) -> Result<HttpResponse> {
    let band = match queue_name.as_str() {
        "all" => None,
        name => Some(
            Priority::from_queue_name(name)
                .ok_or_else(|| AppError::Validation(format!("Unknown queue '{name}'")))?,
        ),
    };

    let removed = service.clear_queue(band).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

/// Upload handlers - HTTP endpoints for admission and status queries
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::UploadRequest;
use crate::services::UploadQueueService;

/// Submit an upload for processing
pub async fn enqueue_upload(
    service: web::Data<Arc<UploadQueueService>>,
    request: web::Json<UploadRequest>,
) -> Result<HttpResponse> {
    let receipt = service.add_upload(request.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(receipt))
}

/// Look up the current status of an upload
pub async fn get_upload_status(
    service: web::Data<Arc<UploadQueueService>>,
    upload_id: web::Path<String>,
) -> Result<HttpResponse> {
    let upload_uuid = Uuid::parse_str(&upload_id)
        .map_err(|_| AppError::Validation("Invalid upload ID".to_string()))?;

    let status = service
        .get_upload_status(upload_uuid)
        .await
        .ok_or_else(|| AppError::NotFound("Upload not found".to_string()))?;

    Ok(HttpResponse::Ok().json(status))
}

/// Admission control: request validation and priority classification
///
/// Both functions are pure and synchronous. A rejected request leaves no
/// trace in the service; classification only reads the request and the
/// current total backlog.
use crate::error::{AppError, Result};
use crate::models::{Priority, PriorityHint, UploadRequest};

/// Payloads smaller than this are latency-sensitive and promoted
const SMALL_IMAGE_BYTES: usize = 500_000;
/// Payloads larger than this are demoted to background processing
const LARGE_IMAGE_BYTES: usize = 2_000_000;
/// Base64 bodies shorter than this cannot be a real image
const MIN_BASE64_LEN: usize = 100;

/// Estimate the decoded byte size of a base64 data-URL without decoding it
pub fn estimated_decoded_size(image_data: &str) -> usize {
    let body = image_data
        .split_once(',')
        .map(|(_, body)| body)
        .unwrap_or(image_data);
    body.len() * 3 / 4
}

/// Validate an upload request. Side-effect free; failures mean the item is
/// never enqueued.
pub fn validate_upload(request: &UploadRequest, max_file_size_bytes: usize) -> Result<()> {
    if request.image_data.is_empty() {
        return Err(AppError::Validation("image data is required".to_string()));
    }

    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("user id is required".to_string()));
    }

    if !request.image_data.starts_with("data:image/") {
        return Err(AppError::Validation(
            "image payload must be an image data-URL".to_string(),
        ));
    }

    let size = estimated_decoded_size(&request.image_data);
    if size > max_file_size_bytes {
        return Err(AppError::Validation(format!(
            "image too large: {size} bytes (max: {max_file_size_bytes})"
        )));
    }

    match request.image_data.split_once(',') {
        Some((_, body)) if body.len() >= MIN_BASE64_LEN => Ok(()),
        _ => Err(AppError::Validation(
            "invalid or empty image data".to_string(),
        )),
    }
}

/// Classify a request into a priority band.
///
/// Baseline is normal. Keyboard-extension and small payloads promote to at
/// least high; oversized payloads demote to low. An explicit hint overrides
/// the size rules. When the total backlog is past the high-water mark the
/// result is demoted one level (clamped at low), hints included.
pub fn determine_priority(
    request: &UploadRequest,
    total_queued: usize,
    high_water_mark: usize,
) -> Priority {
    let mut level: u8 = Priority::Normal.level();

    if request.is_keyboard_extension {
        level = level.min(Priority::High.level());
    }

    let size = estimated_decoded_size(&request.image_data);
    if size < SMALL_IMAGE_BYTES {
        level = level.min(Priority::High.level());
    } else if size > LARGE_IMAGE_BYTES {
        level = level.max(Priority::Low.level());
    }

    match request.priority_hint {
        Some(PriorityHint::Urgent) => level = Priority::Urgent.level(),
        Some(PriorityHint::Background) => level = Priority::Low.level(),
        None => {}
    }

    if total_queued > high_water_mark {
        level = (level + 1).min(Priority::Low.level());
    }

    Priority::from_level(level)
}

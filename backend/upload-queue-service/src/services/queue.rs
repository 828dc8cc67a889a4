/// Priority queue set for upload admission and dispatch
///
/// Four capacity-bounded FIFO bands (urgent/high/normal/low). Dispatch is
/// strict priority: the highest non-empty band always wins, with no aging
/// or weighted fairness, so sustained urgent/high traffic can starve the
/// low band indefinitely. That trade-off is deliberate.
use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Priority, QueueDepths, UploadContext};

pub struct PriorityQueueSet {
    bands: [VecDeque<UploadContext>; 4],
    /// Max items per band; enqueue past this fails with no mutation
    capacity: usize,
}

impl PriorityQueueSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            bands: std::array::from_fn(|_| VecDeque::new()),
            capacity,
        }
    }

    fn band(&self, priority: Priority) -> &VecDeque<UploadContext> {
        &self.bands[priority.level() as usize]
    }

    fn band_mut(&mut self, priority: Priority) -> &mut VecDeque<UploadContext> {
        &mut self.bands[priority.level() as usize]
    }

    /// Append a context to the tail of its band.
    ///
    /// Returns the 1-based queue position, or `Capacity` when the band is
    /// full. A full band is left untouched.
    pub fn enqueue(&mut self, context: UploadContext) -> Result<usize> {
        let priority = context.priority;
        if self.band(priority).len() >= self.capacity {
            return Err(AppError::Capacity(priority.queue_name().to_string()));
        }

        let band = self.band_mut(priority);
        band.push_back(context);
        Ok(band.len())
    }

    /// Pop the head of the highest-priority non-empty band
    pub fn pop_next(&mut self) -> Option<UploadContext> {
        for priority in Priority::ALL {
            if let Some(context) = self.band_mut(priority).pop_front() {
                return Some(context);
            }
        }
        None
    }

    /// Locate a queued upload; returns its 1-based position within its band
    pub fn find(&self, upload_id: Uuid) -> Option<(usize, &UploadContext)> {
        for priority in Priority::ALL {
            if let Some(index) = self
                .band(priority)
                .iter()
                .position(|ctx| ctx.upload_id == upload_id)
            {
                return Some((index + 1, &self.band(priority)[index]));
            }
        }
        None
    }

    pub fn depth(&self, priority: Priority) -> usize {
        self.band(priority).len()
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            urgent: self.depth(Priority::Urgent),
            high: self.depth(Priority::High),
            normal: self.depth(Priority::Normal),
            low: self.depth(Priority::Low),
        }
    }

    pub fn total_len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }

    /// Drop queued items from one band, or from all bands when `None`.
    /// Returns the number of items removed.
    pub fn clear(&mut self, band: Option<Priority>) -> usize {
        match band {
            Some(priority) => {
                let removed = self.depth(priority);
                self.band_mut(priority).clear();
                removed
            }
            None => {
                let removed = self.total_len();
                for band in self.bands.iter_mut() {
                    band.clear();
                }
                removed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadRequest;
    use std::time::Duration;

    fn create_test_context(user_id: &str, priority: Priority) -> UploadContext {
        let request = UploadRequest {
            user_id: user_id.to_string(),
            correlation_id: None,
            image_data: "data:image/png;base64,dGVzdA==".to_string(),
            is_keyboard_extension: false,
            priority_hint: None,
            generation_params: serde_json::Value::Null,
            platform: None,
            user_agent: None,
        };
        UploadContext::new(request, priority, 4, Duration::from_secs(10))
    }

    #[test]
    fn test_enqueue_returns_position() {
        let mut queues = PriorityQueueSet::new(10);
        let first = queues
            .enqueue(create_test_context("u1", Priority::Normal))
            .unwrap();
        let second = queues
            .enqueue(create_test_context("u2", Priority::Normal))
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(queues.depth(Priority::Normal), 2);
    }

    #[test]
    fn test_strict_priority_order() {
        let mut queues = PriorityQueueSet::new(10);
        queues
            .enqueue(create_test_context("low", Priority::Low))
            .unwrap();
        queues
            .enqueue(create_test_context("normal", Priority::Normal))
            .unwrap();
        queues
            .enqueue(create_test_context("urgent", Priority::Urgent))
            .unwrap();
        queues
            .enqueue(create_test_context("high", Priority::High))
            .unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queues.pop_next())
            .map(|ctx| ctx.user_id)
            .collect();
        assert_eq!(order, vec!["urgent", "high", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_band() {
        let mut queues = PriorityQueueSet::new(10);
        let a = create_test_context("a", Priority::Normal);
        let b = create_test_context("b", Priority::Normal);
        let a_id = a.upload_id;
        let b_id = b.upload_id;

        queues.enqueue(a).unwrap();
        queues.enqueue(b).unwrap();

        assert_eq!(queues.pop_next().unwrap().upload_id, a_id);
        assert_eq!(queues.pop_next().unwrap().upload_id, b_id);
    }

    #[test]
    fn test_full_band_rejects_without_mutation() {
        let mut queues = PriorityQueueSet::new(2);
        queues
            .enqueue(create_test_context("a", Priority::Normal))
            .unwrap();
        queues
            .enqueue(create_test_context("b", Priority::Normal))
            .unwrap();

        let result = queues.enqueue(create_test_context("c", Priority::Normal));
        assert!(matches!(result, Err(AppError::Capacity(ref q)) if q == "normal"));
        assert_eq!(queues.depth(Priority::Normal), 2);

        // Other bands are unaffected by one band being full
        assert!(queues
            .enqueue(create_test_context("d", Priority::High))
            .is_ok());
    }

    #[test]
    fn test_find_reports_band_position() {
        let mut queues = PriorityQueueSet::new(10);
        queues
            .enqueue(create_test_context("first", Priority::Normal))
            .unwrap();
        let target = create_test_context("second", Priority::Normal);
        let target_id = target.upload_id;
        queues.enqueue(target).unwrap();

        let (position, found) = queues.find(target_id).unwrap();
        assert_eq!(position, 2);
        assert_eq!(found.user_id, "second");

        assert!(queues.find(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_clear_single_band_and_all() {
        let mut queues = PriorityQueueSet::new(10);
        queues
            .enqueue(create_test_context("a", Priority::Urgent))
            .unwrap();
        queues
            .enqueue(create_test_context("b", Priority::Low))
            .unwrap();
        queues
            .enqueue(create_test_context("c", Priority::Low))
            .unwrap();

        assert_eq!(queues.clear(Some(Priority::Low)), 2);
        assert_eq!(queues.total_len(), 1);

        assert_eq!(queues.clear(None), 1);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_depths_snapshot() {
        let mut queues = PriorityQueueSet::new(10);
        queues
            .enqueue(create_test_context("a", Priority::Urgent))
            .unwrap();
        queues
            .enqueue(create_test_context("b", Priority::Normal))
            .unwrap();
        queues
            .enqueue(create_test_context("c", Priority::Normal))
            .unwrap();

        let depths = queues.depths();
        assert_eq!(depths.urgent, 1);
        assert_eq!(depths.high, 0);
        assert_eq!(depths.normal, 2);
        assert_eq!(depths.low, 0);
        assert_eq!(depths.total(), 3);
    }
}

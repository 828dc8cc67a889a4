/// Lifecycle update broadcaster
///
/// Fans queue lifecycle events out to per-user subscribers. Delivery is
/// fire-and-forget: a user with no subscribers is a debug log, never an
/// error, and nothing is retried. External transports (a WebSocket layer,
/// an SSE bridge) subscribe here and own delivery beyond the channel.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Lifecycle transition names on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Queued,
    ProcessingStarted,
    Progress,
    Completed,
    Failed,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::ProcessingStarted => "processing_started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One lifecycle event for one upload
#[derive(Debug, Clone, Serialize)]
pub struct QueueUpdate {
    pub upload_id: Uuid,
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Event-specific fields, flattened into the message
    #[serde(flatten)]
    pub payload: Value,
}

/// Type alias for update senders
pub type UpdateSender = mpsc::UnboundedSender<QueueUpdate>;

/// Routes lifecycle updates to subscribed listeners
///
/// Thread-safe via `Arc<RwLock<>>`; each user can hold multiple concurrent
/// subscriptions. Closed subscriptions are pruned on the next send.
#[derive(Clone, Default)]
pub struct UpdateBroadcaster {
    subscribers: Arc<RwLock<HashMap<String, Vec<UpdateSender>>>>,
}

impl UpdateBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to a user's lifecycle updates
    pub async fn subscribe(&self, user_id: &str) -> mpsc::UnboundedReceiver<QueueUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(user_id.to_string())
            .or_insert_with(Vec::new)
            .push(tx);
        rx
    }

    /// Drop all of a user's subscriptions
    pub async fn unsubscribe(&self, user_id: &str) {
        self.subscribers.write().await.remove(user_id);
    }

    /// Push an update to every live subscription for the user.
    ///
    /// Returns the number of subscriptions the update was delivered to.
    pub async fn send_to_user(&self, user_id: &str, update: QueueUpdate) -> usize {
        let mut subscribers = self.subscribers.write().await;

        let delivered = if let Some(senders) = subscribers.get_mut(user_id) {
            senders.retain(|sender| sender.send(update.clone()).is_ok());
            senders.len()
        } else {
            0
        };

        if delivered == 0 {
            subscribers.remove(user_id);
            debug!(
                upload_id = %update.upload_id,
                user_id,
                update_type = update.update_type.as_str(),
                "No subscribers for upload update"
            );
        }

        delivered
    }

    /// Number of users with at least one live subscription
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

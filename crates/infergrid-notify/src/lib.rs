//! infergrid-notify — fire-and-forget event publishing.
//!
//! Every pipeline step and reconciliation cycle publishes a
//! `Notification` to a topic keyed by workflow id (periodic syncs use no
//! topic). Publishing is best-effort: failures are logged at warn and
//! never escalated to the operation that triggered them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Step/terminal status carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Started,
    Running,
    Completed,
    Failed,
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Event name, e.g. a pipeline step or `deployment_sync`.
    pub event: String,
    pub status: EventStatus,
    pub title: String,
    pub message: String,
    /// Optional structured payload (ETA, endpoints, benchmark figures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// An addressed notification as seen by subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Topic, usually the workflow id. None for periodic syncs.
    pub topic: Option<String>,
    pub notification: Notification,
}

/// Publisher seam. Implementations must never let a publish failure
/// propagate to the caller.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, topic: Option<&str>, notification: Notification);
}

/// In-process fan-out over a tokio broadcast channel. The REST layer
/// subscribes to stream events to clients.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all published envelopes.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationPublisher for BroadcastPublisher {
    async fn publish(&self, topic: Option<&str>, notification: Notification) {
        let envelope = Envelope {
            topic: topic.map(str::to_string),
            notification,
        };
        // No receivers is not an error for fire-and-forget delivery.
        if let Err(e) = self.tx.send(envelope) {
            warn!(error = %e, "notification dropped: no subscribers");
        }
    }
}

/// Discards everything. Used by tests that don't assert on events.
pub struct NoopPublisher;

#[async_trait]
impl NotificationPublisher for NoopPublisher {
    async fn publish(&self, _topic: Option<&str>, _notification: Notification) {}
}

/// Convenience constructor used across pipeline steps.
pub fn notification(
    event: &str,
    status: EventStatus,
    title: &str,
    message: &str,
    result: Option<serde_json::Value>,
) -> Notification {
    Notification {
        event: event.to_string(),
        status,
        title: title.to_string(),
        message: message.to_string(),
        result,
    }
}

/// Shared publisher handle.
pub type Publisher = Arc<dyn NotificationPublisher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_to_subscriber() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher
            .publish(
                Some("wf-1"),
                notification("deploy_to_engine", EventStatus::Running, "Deploying", "", None),
            )
            .await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic.as_deref(), Some("wf-1"));
        assert_eq!(envelope.notification.event, "deploy_to_engine");
        assert_eq!(envelope.notification.status, EventStatus::Running);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_fail() {
        let publisher = BroadcastPublisher::new(4);
        // No subscriber attached: must not panic or error.
        publisher
            .publish(None, notification("sync", EventStatus::Completed, "", "", None))
            .await;
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_value(EventStatus::Failed).unwrap();
        assert_eq!(json, "FAILED");
    }
}

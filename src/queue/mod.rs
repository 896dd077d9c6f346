//! FIFO hand-off of webhook events from producers to delivery workers.
//!
//! Producers push onto the head of a backend list and workers block-pop from
//! the tail, so ordering between enqueue and dequeue calls is the list's
//! order. Delivery is at-most-once: a popped event is gone from the store,
//! and there is no acknowledgement or redelivery. The queue has no maximum
//! depth; [`WebhookQueue::size`] is exposed for operators.

mod delivery;
mod worker;

pub use delivery::{HttpWebhookDelivery, WebhookDelivery};
pub use worker::{WebhookWorkerPool, WorkerStats};

use crate::core::Result;
use crate::store::AtomicStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// A webhook event waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub id: String,
    pub instance_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(
        instance_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Backend list used as a webhook queue.
#[derive(Clone)]
pub struct WebhookQueue {
    store: Arc<dyn AtomicStore>,
    key: String,
}

impl WebhookQueue {
    pub fn new(store: Arc<dyn AtomicStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn enqueue(&self, event: &QueueEvent) -> Result<()> {
        let data = serde_json::to_string(event)?;
        self.store.push(&self.key, data).await?;
        Ok(())
    }

    /// Waits up to `timeout` for the oldest event.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing queued. A payload
    /// that fails to decode is reported as an error; it has already been
    /// removed from the store.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<QueueEvent>> {
        let Some(raw) = self.store.blocking_pop(&self.key, timeout).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(event) => Ok(Some(event)),
            Err(err) => {
                warn!(queue = %self.key, error = %err, "discarding malformed queue payload");
                Err(err.into())
            }
        }
    }

    pub async fn size(&self) -> Result<u64> {
        self.store.list_len(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GatewayError;
    use crate::store::InMemoryAtomicStore;
    use serde_json::json;

    #[test]
    fn event_wire_format_is_camel_case() {
        let event = QueueEvent::new("inst-1", "message.received", json!({"text": "hi"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["instanceId"], "inst-1");
        assert_eq!(value["type"], "message.received");
        assert_eq!(value["payload"]["text"], "hi");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("event_type").is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error_not_none() {
        let store: Arc<dyn AtomicStore> = Arc::new(InMemoryAtomicStore::new());
        store.push("webhook:events", "{broken".to_string()).await.unwrap();

        let queue = WebhookQueue::new(Arc::clone(&store), "webhook:events");
        let err = queue.dequeue(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Serialization(_)));
        assert_eq!(queue.size().await.unwrap(), 0);
    }
}

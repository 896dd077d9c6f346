use super::QueueEvent;
use crate::core::{GatewayError, Result};
use crate::session::InstanceRepository;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sink that hands a dequeued event to its final consumer.
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    async fn deliver(&self, event: &QueueEvent) -> Result<()>;
}

/// POSTs the event JSON to the instance's configured webhook URL.
pub struct HttpWebhookDelivery {
    client: reqwest::Client,
    instances: Arc<dyn InstanceRepository>,
}

impl HttpWebhookDelivery {
    pub fn new(instances: Arc<dyn InstanceRepository>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Config(format!("webhook http client: {}", err)))?;
        Ok(Self { client, instances })
    }
}

#[async_trait]
impl WebhookDelivery for HttpWebhookDelivery {
    async fn deliver(&self, event: &QueueEvent) -> Result<()> {
        let instance = self.instances.get_by_id(&event.instance_id).await?;
        let Some(url) = instance.webhook_url.as_deref() else {
            debug!(instance_id = %event.instance_id, "no webhook configured, dropping event");
            return Ok(());
        };

        self.client
            .post(url)
            .header("X-Webhook-Event", event.event_type.as_str())
            .header("X-Instance-Id", event.instance_id.as_str())
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| GatewayError::Delivery(format!("event {}: {}", event.id, err)))?;
        Ok(())
    }
}

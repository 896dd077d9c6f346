use crate::core::{GatewayError, Instance, InstanceStatus, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence of instance records.
///
/// Each call must be atomic on its own; callers never hold a lock across
/// calls.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Instance>;

    /// Replaces the stored record; fails with `NotFound` for unknown ids.
    async fn update(&self, instance: Instance) -> Result<Instance>;

    /// Sets only the connection status.
    ///
    /// The default is a read followed by a full write. Implementations that
    /// can change a single field atomically should override it so a status
    /// write never clobbers concurrent edits to other fields.
    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<Instance> {
        let mut instance = self.get_by_id(id).await?;
        instance.status = status;
        self.update(instance).await
    }
}

/// Process-local repository for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryInstanceRepository {
    data: RwLock<HashMap<String, Instance>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, mut instance: Instance) -> Result<Instance> {
        if instance.id.trim().is_empty() {
            return Err(GatewayError::InvalidInput("instance id must not be empty".to_string()));
        }
        let mut data = self.data.write().await;
        if data.contains_key(&instance.id) {
            return Err(GatewayError::InvalidInput(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        let now = Utc::now();
        instance.created_at = now;
        instance.updated_at = now;
        data.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    pub async fn list(&self) -> Vec<Instance> {
        let data = self.data.read().await;
        let mut out: Vec<Instance> = data.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("instance {}", id)))
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn get_by_id(&self, id: &str) -> Result<Instance> {
        let data = self.data.read().await;
        data.get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("instance {}", id)))
    }

    async fn update(&self, mut instance: Instance) -> Result<Instance> {
        let mut data = self.data.write().await;
        let Some(slot) = data.get_mut(&instance.id) else {
            return Err(GatewayError::NotFound(format!("instance {}", instance.id)));
        };
        instance.updated_at = Utc::now();
        *slot = instance.clone();
        Ok(instance)
    }

    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<Instance> {
        let mut data = self.data.write().await;
        let instance = data
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("instance {}", id)))?;
        instance.status = status;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }
}

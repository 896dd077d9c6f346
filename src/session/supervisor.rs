use super::{ConnectionEvent, DisconnectCallback, InstanceRepository, InstanceWatchdog};
use crate::core::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span, warn};

struct RunningWatchdog {
    watchdog: Arc<InstanceWatchdog>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns one watchdog task per live instance.
pub struct WatchdogSupervisor {
    repo: Arc<dyn InstanceRepository>,
    poll_interval: Duration,
    on_disconnect: Option<DisconnectCallback>,
    running: Mutex<HashMap<String, RunningWatchdog>>,
}

impl WatchdogSupervisor {
    pub fn new(repo: Arc<dyn InstanceRepository>, poll_interval: Duration) -> Self {
        Self {
            repo,
            poll_interval,
            on_disconnect: None,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Callback installed on every watchdog started afterwards.
    pub fn with_on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    /// Starts the watchdog for `instance_id`, or returns the running one.
    pub async fn start(&self, instance_id: &str) -> Arc<InstanceWatchdog> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(instance_id) {
            return Arc::clone(&existing.watchdog);
        }

        let mut watchdog = InstanceWatchdog::new(instance_id, Arc::clone(&self.repo))
            .with_poll_interval(self.poll_interval);
        if let Some(callback) = &self.on_disconnect {
            watchdog = watchdog.with_on_disconnect(Arc::clone(callback));
        }
        let watchdog = Arc::new(watchdog);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = {
            let watchdog = Arc::clone(&watchdog);
            let span = info_span!("watchdog", instance_id = %instance_id);
            tokio::spawn(async move { watchdog.run(shutdown_rx).await }.instrument(span))
        };

        running.insert(
            instance_id.to_string(),
            RunningWatchdog {
                watchdog: Arc::clone(&watchdog),
                shutdown,
                task,
            },
        );
        watchdog
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<InstanceWatchdog>> {
        let running = self.running.lock().await;
        running.get(instance_id).map(|r| Arc::clone(&r.watchdog))
    }

    pub async fn len(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Routes a connectivity event to the instance's watchdog.
    pub async fn dispatch(&self, instance_id: &str, event: &ConnectionEvent) -> Result<()> {
        let watchdog = self
            .get(instance_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("watchdog for instance {}", instance_id)))?;
        watchdog.handle_event(event).await;
        Ok(())
    }

    /// Stops the watchdog for `instance_id` and waits for its task.
    /// Returns false if none was running.
    pub async fn stop(&self, instance_id: &str) -> bool {
        let removed = self.running.lock().await.remove(instance_id);
        match removed {
            Some(entry) => {
                Self::shutdown(instance_id, entry).await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.running.lock().await.drain().collect();
        for (instance_id, entry) in drained {
            Self::shutdown(&instance_id, entry).await;
        }
    }

    async fn shutdown(instance_id: &str, entry: RunningWatchdog) {
        let _ = entry.shutdown.send(true);
        if let Err(err) = entry.task.await {
            warn!(instance_id = %instance_id, error = %err, "watchdog task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Instance, InstanceStatus};
    use crate::session::InMemoryInstanceRepository;

    #[tokio::test]
    async fn start_is_idempotent_and_stop_removes() {
        let repo = Arc::new(InMemoryInstanceRepository::new());
        repo.create(Instance::new("i-1", "one")).await.unwrap();
        let supervisor = WatchdogSupervisor::new(repo.clone(), Duration::from_secs(30));

        let first = supervisor.start("i-1").await;
        let second = supervisor.start("i-1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(supervisor.len().await, 1);

        assert!(supervisor.stop("i-1").await);
        assert!(!supervisor.stop("i-1").await);
        assert!(supervisor.is_empty().await);
    }

    #[tokio::test]
    async fn dispatch_requires_running_watchdog() {
        let repo = Arc::new(InMemoryInstanceRepository::new());
        repo.create(Instance::new("i-1", "one")).await.unwrap();
        let supervisor = WatchdogSupervisor::new(repo.clone(), Duration::from_secs(30));

        let err = supervisor
            .dispatch("i-1", &ConnectionEvent::Connected)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        supervisor.start("i-1").await;
        supervisor.dispatch("i-1", &ConnectionEvent::Connected).await.unwrap();
        assert_eq!(repo.get_by_id("i-1").await.unwrap().status, InstanceStatus::Active);
        supervisor.stop_all().await;
    }
}

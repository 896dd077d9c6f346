use super::{ConnectionEvent, InstanceRepository};
use crate::core::{InstanceStatus, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Invoked with the instance id whenever the instance is seen disconnected.
/// May fire repeatedly while the instance stays in error.
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Reconciles one instance's connection state.
///
/// Two paths touch the persisted record: [`run`](Self::run) polls it on a
/// fixed interval, and [`handle_event`](Self::handle_event) applies
/// connectivity events as they arrive. They are not serialized against each
/// other; each repository call is atomic and both paths converge on their
/// next invocation. Repository failures are logged and never stop the loop.
pub struct InstanceWatchdog {
    instance_id: String,
    repo: Arc<dyn InstanceRepository>,
    poll_interval: Duration,
    on_disconnect: Option<DisconnectCallback>,
}

impl fmt::Debug for InstanceWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceWatchdog")
            .field("instance_id", &self.instance_id)
            .field("poll_interval", &self.poll_interval)
            .field("has_callback", &self.on_disconnect.is_some())
            .finish()
    }
}

impl InstanceWatchdog {
    pub fn new(instance_id: impl Into<String>, repo: Arc<dyn InstanceRepository>) -> Self {
        Self {
            instance_id: instance_id.into(),
            repo,
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_disconnect: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    pub fn set_on_disconnect<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current persisted status.
    pub async fn status(&self) -> Result<InstanceStatus> {
        Ok(self.repo.get_by_id(&self.instance_id).await?.status)
    }

    pub async fn is_connected(&self) -> Result<bool> {
        Ok(self.status().await? == InstanceStatus::Active)
    }

    /// Poll loop; returns once `shutdown` flips to true or its sender is
    /// dropped. The first poll happens one interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(instance_id = %self.instance_id, "watchdog started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let _ = self.poll_once().await;
                }
            }
        }
        info!(instance_id = %self.instance_id, "watchdog stopped");
    }

    /// One poll tick: reads the persisted status and fires the disconnect
    /// callback if it is `Error`. Returns the observed status, or `None` if
    /// the read failed.
    pub async fn poll_once(&self) -> Option<InstanceStatus> {
        match self.repo.get_by_id(&self.instance_id).await {
            Ok(instance) => {
                if instance.status == InstanceStatus::Error {
                    warn!(instance_id = %self.instance_id, "watchdog: instance in error state");
                    self.notify_disconnect();
                }
                Some(instance.status)
            }
            Err(err) => {
                error!(instance_id = %self.instance_id, error = %err, "watchdog: failed to load instance");
                None
            }
        }
    }

    /// Applies a connectivity event immediately.
    ///
    /// A disconnect persists `Error` and fires the callback even if the write
    /// failed; a connect persists `Active`.
    pub async fn handle_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnected { reason } => {
                warn!(
                    instance_id = %self.instance_id,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "watchdog: disconnected"
                );
                self.persist_status(InstanceStatus::Error).await;
                self.notify_disconnect();
            }
            ConnectionEvent::Connected => {
                info!(instance_id = %self.instance_id, "watchdog: connected");
                self.persist_status(InstanceStatus::Active).await;
            }
        }
    }

    async fn persist_status(&self, status: InstanceStatus) {
        match self.repo.update_status(&self.instance_id, status).await {
            Ok(_) => debug!(instance_id = %self.instance_id, %status, "watchdog: status persisted"),
            Err(err) => {
                error!(instance_id = %self.instance_id, %status, error = %err, "watchdog: failed to persist status")
            }
        }
    }

    fn notify_disconnect(&self) {
        if let Some(callback) = &self.on_disconnect {
            callback(&self.instance_id);
        }
    }
}

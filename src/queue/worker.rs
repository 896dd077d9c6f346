use super::{WebhookDelivery, WebhookQueue};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

const BACKEND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dequeue_errors: AtomicU64,
}

impl WorkerStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dequeue_errors(&self) -> u64 {
        self.dequeue_errors.load(Ordering::Relaxed)
    }
}

/// Fixed set of tasks draining a [`WebhookQueue`] into a [`WebhookDelivery`].
///
/// Workers re-check the shutdown signal between dequeues, so shutdown latency
/// is bounded by the dequeue timeout. An in-flight pop is never cancelled,
/// which would drop an event the backend has already removed.
pub struct WebhookWorkerPool {
    queue: WebhookQueue,
    delivery: Arc<dyn WebhookDelivery>,
    workers: usize,
    dequeue_timeout: Duration,
    stats: Arc<WorkerStats>,
}

impl WebhookWorkerPool {
    pub fn new(
        queue: WebhookQueue,
        delivery: Arc<dyn WebhookDelivery>,
        workers: usize,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            delivery,
            workers: workers.max(1),
            dequeue_timeout,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Spawns the workers; the returned task completes once all have exited.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let handles: Vec<_> = (0..self.workers)
            .map(|worker_id| {
                let worker = Worker {
                    queue: self.queue.clone(),
                    delivery: Arc::clone(&self.delivery),
                    dequeue_timeout: self.dequeue_timeout,
                    stats: Arc::clone(&self.stats),
                };
                let span = info_span!("webhook.worker", worker_id, queue = %self.queue.key());
                tokio::spawn(worker.run(shutdown.clone()).instrument(span))
            })
            .collect();

        tokio::spawn(async move {
            for result in join_all(handles).await {
                if let Err(err) = result {
                    warn!(error = %err, "webhook worker task panicked");
                }
            }
            info!("webhook workers stopped");
        })
    }
}

struct Worker {
    queue: WebhookQueue,
    delivery: Arc<dyn WebhookDelivery>,
    dequeue_timeout: Duration,
    stats: Arc<WorkerStats>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("webhook worker started");
        while !*shutdown.borrow() {
            match self.queue.dequeue(self.dequeue_timeout).await {
                Ok(Some(event)) => match self.delivery.deliver(&event).await {
                    Ok(()) => {
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!(event_id = %event.id, "webhook delivered");
                    }
                    Err(err) => {
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            event_id = %event.id,
                            instance_id = %event.instance_id,
                            error = %err,
                            "webhook delivery failed, event dropped"
                        );
                    }
                },
                Ok(None) => {}
                Err(err) if err.is_backend() => {
                    self.stats.dequeue_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "webhook queue unavailable");
                    tokio::select! {
                        _ = tokio::time::sleep(BACKEND_RETRY_DELAY) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    self.stats.dequeue_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "webhook queue returned an unreadable event");
                }
            }
        }
        debug!("webhook worker stopped");
    }
}

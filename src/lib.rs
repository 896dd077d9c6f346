// ============================================================================
// sessiongate library
// ============================================================================

//! Coordination layer for a multi-tenant messaging-session gateway.
//!
//! Four primitives are shared by every gateway process through a remote
//! key-value store ([`store::AtomicStore`]):
//!
//! - [`RateLimiter`]: fixed-window quotas per client address or bearer token
//! - [`DistributedLock`]: TTL mutual exclusion with owner-checked release
//! - [`WebhookQueue`]: FIFO hand-off of webhook events to delivery workers
//! - [`InstanceWatchdog`]: per-instance connection-state reconciliation
//!
//! # Examples
//!
//! ```
//! use sessiongate::{InMemoryAtomicStore, RateLimitConfig, RateLimitScope, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryAtomicStore::new());
//! let limiter = RateLimiter::new(
//!     store,
//!     RateLimitScope::Token,
//!     RateLimitConfig::new(2, Duration::from_secs(10), "ratelimit:api"),
//! );
//!
//! assert!(limiter.check("token-a").await?.allowed());
//! assert!(limiter.check("token-a").await?.allowed());
//! assert!(!limiter.check("token-a").await?.allowed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod lock;
pub mod queue;
pub mod ratelimit;
pub mod session;
pub mod store;
pub mod web;

// Re-export main types for convenience
pub use config::{GatewayConfig, RateLimitConfig, RedisConfig, WatchdogConfig, WebhookConfig};
pub use core::{GatewayError, Instance, InstanceStatus, Result};
pub use lock::{DistributedLock, run_exclusive};
pub use queue::{
    HttpWebhookDelivery, QueueEvent, WebhookDelivery, WebhookQueue, WebhookWorkerPool, WorkerStats,
};
pub use ratelimit::{RateLimitDecision, RateLimitScope, RateLimiter};
pub use session::{
    ConnectionEvent, DisconnectCallback, InMemoryInstanceRepository, InstanceRepository,
    InstanceWatchdog, WatchdogSupervisor,
};
pub use store::{AtomicStore, CounterSnapshot, InMemoryAtomicStore};
#[cfg(feature = "redis")]
pub use store::RedisAtomicStore;
pub use web::{AppState, build_router};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How often the in-process store drops expired keys.
pub const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Opens the coordination backend described by `config`.
///
/// An empty URL selects the in-process store, which only coordinates within
/// this process. Its expired keys are purged in the background until
/// `shutdown` fires.
pub async fn connect_store(
    config: &RedisConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Arc<dyn AtomicStore>> {
    if !config.is_configured() {
        tracing::warn!("no redis url configured, using in-process coordination store");
        let store = Arc::new(InMemoryAtomicStore::new());
        store.spawn_purger(MEMORY_PURGE_INTERVAL, shutdown);
        return Ok(store);
    }

    connect_remote(config).await
}

#[cfg(feature = "redis")]
async fn connect_remote(config: &RedisConfig) -> Result<Arc<dyn AtomicStore>> {
    tracing::info!(url = %config.redacted_url(), "connecting to redis");
    let store = RedisAtomicStore::connect(&config.url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_remote(config: &RedisConfig) -> Result<Arc<dyn AtomicStore>> {
    Err(GatewayError::Config(format!(
        "redis url {} configured but the `redis` feature is disabled",
        config.redacted_url()
    )))
}

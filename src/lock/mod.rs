//! TTL-based mutual exclusion over the coordination backend.
//!
//! A lock is a key holding a random owner token. Acquisition is a single
//! set-if-absent with expiry; release is a single compare-and-delete, so a
//! handle whose lease already expired can never delete a newer holder's
//! lock. There is no lease renewal: callers size the TTL to cover the whole
//! critical section, and a lock that is never released simply expires.

use crate::core::{GatewayError, Result};
use crate::store::AtomicStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle to one named lock.
///
/// # Examples
///
/// ```
/// use sessiongate::{AtomicStore, DistributedLock, InMemoryAtomicStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let store: Arc<dyn AtomicStore> = Arc::new(InMemoryAtomicStore::new());
/// let mut first = DistributedLock::new(Arc::clone(&store), "lock:instance:42", Duration::from_secs(5));
/// let mut second = DistributedLock::new(store, "lock:instance:42", Duration::from_secs(5));
///
/// assert!(first.acquire().await.unwrap());
/// assert!(!second.acquire().await.unwrap());
/// assert!(first.release().await.unwrap());
/// assert!(second.acquire().await.unwrap());
/// # });
/// ```
pub struct DistributedLock {
    store: Arc<dyn AtomicStore>,
    key: String,
    ttl: Duration,
    owner: Option<String>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn AtomicStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            owner: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Owner token of the most recent successful acquisition.
    pub fn owner_token(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Tries once to take the lock with a fresh owner token.
    ///
    /// Returns `Ok(false)` when another holder has it; backend failures are
    /// returned so the caller can decide how to treat them.
    pub async fn acquire(&mut self) -> Result<bool> {
        if self.ttl.is_zero() {
            return Err(GatewayError::InvalidInput(format!(
                "lock '{}' needs a non-zero ttl",
                self.key
            )));
        }
        let token = Uuid::new_v4().to_string();
        let acquired = self.store.set_if_absent(&self.key, &token, self.ttl).await?;
        if acquired {
            debug!(key = %self.key, "lock acquired");
            self.owner = Some(token);
        }
        Ok(acquired)
    }

    /// Deletes the lock if this handle still owns it.
    ///
    /// Returns `Ok(false)` when there was nothing of ours to delete (never
    /// acquired, expired, or re-acquired by someone else).
    pub async fn release(&mut self) -> Result<bool> {
        let Some(token) = self.owner.take() else {
            return Ok(false);
        };
        let released = self.store.compare_and_delete(&self.key, &token).await?;
        if !released {
            debug!(key = %self.key, "lock already expired or taken over");
        }
        Ok(released)
    }

    /// Release that only logs backend failures; the TTL cleans up.
    pub async fn release_quietly(&mut self) {
        if let Err(err) = self.release().await {
            warn!(key = %self.key, error = %err, "lock release failed, leaving it to expire");
        }
    }
}

/// Runs `critical` while holding `key`.
///
/// Returns `Ok(None)` without running it when the lock is held elsewhere.
pub async fn run_exclusive<F, Fut, T>(
    store: Arc<dyn AtomicStore>,
    key: &str,
    ttl: Duration,
    critical: F,
) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = DistributedLock::new(store, key, ttl);
    if !lock.acquire().await? {
        return Ok(None);
    }
    let output = critical().await;
    lock.release_quietly().await;
    Ok(Some(output))
}

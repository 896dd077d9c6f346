//! Coordination backend abstraction.
//!
//! Every primitive the gateway shares across processes (rate-limit counters,
//! locks, the webhook queue) is expressed through [`AtomicStore`]. Each method
//! is a single atomic operation on the backend, so callers never need a
//! multi-round-trip transaction for correctness.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::InMemoryAtomicStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisAtomicStore;

use crate::core::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Counter value observed right after an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Post-increment value.
    pub count: i64,
    /// Remaining time-to-live, `None` when the backend reports no expiry.
    pub ttl: Option<Duration>,
}

/// Narrow capability interface over a remote key-value store.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Increments `key` and, only if this call created the counter, sets its
    /// expiry to `window`. Increment, conditional expire and TTL read-back run
    /// as one atomic unit.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<CounterSnapshot>;

    /// Remaining time-to-live of `key`, `None` if missing or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Stores `value` under `key` with `ttl` only if `key` does not exist.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Pushes `value` onto the head of `list`, returning the new length.
    async fn push(&self, list: &str, value: String) -> Result<u64>;

    /// Pops from the tail of `list`, waiting up to `timeout` for an element.
    async fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>>;

    /// Current length of `list`; missing lists have length zero.
    async fn list_len(&self, list: &str) -> Result<u64>;
}

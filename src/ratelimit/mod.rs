//! Fixed-window request quotas shared by every gateway process.
//!
//! Counters live in the coordination backend under
//! `<prefix>:<sha256(identifier)>`. Each check is one atomic
//! increment-with-first-write-expiry, so any number of processes can share a
//! window without a local coordinator. If the backend fails, the limiter
//! fails open.

pub mod identity;
pub mod middleware;

pub use identity::{client_ip, extract_bearer_token, hash_identifier, is_private_ip};
pub use middleware::{limit_by_ip, limit_by_token};

use crate::config::RateLimitConfig;
use crate::core::Result;
use crate::store::{AtomicStore, CounterSnapshot};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Partition category of a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    /// Client network address
    Ip,
    /// Bearer-token identity
    Token,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Token => "token",
        }
    }

    /// Message returned in the 429 body.
    pub fn rejection_message(&self) -> &'static str {
        match self {
            Self::Ip => "too many attempts, try again later",
            Self::Token => "rate limit exceeded",
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Increments the window counter for `identifier` under `prefix`.
///
/// Returns the post-increment count and the remaining window TTL as reported
/// by the backend.
pub async fn hit(
    store: &dyn AtomicStore,
    prefix: &str,
    identifier: &str,
    window: Duration,
) -> Result<CounterSnapshot> {
    let key = format!("{}:{}", prefix, hash_identifier(identifier));
    store.incr_with_expiry(&key, window).await
}

/// Outcome of one quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    /// Post-increment count within the current window
    pub current: i64,
    /// Remaining window TTL; `None` when the backend reported no expiry
    pub ttl: Option<Duration>,
    pub window: Duration,
    pub checked_at: DateTime<Utc>,
}

impl RateLimitDecision {
    pub fn allowed(&self) -> bool {
        self.current <= i64::from(self.limit)
    }

    pub fn remaining(&self) -> u32 {
        (i64::from(self.limit) - self.current).max(0) as u32
    }

    /// Time until the window resets, falling back to the full window.
    pub fn reset_after(&self) -> Duration {
        self.ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(self.window)
    }

    /// Unix seconds at which the window resets.
    pub fn reset_at(&self) -> i64 {
        let reset_after = chrono::Duration::from_std(self.reset_after())
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.checked_at + reset_after).timestamp()
    }

    /// Whole seconds a rejected client should wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let after = self.reset_after();
        after.as_secs() + u64::from(after.subsec_nanos() > 0)
    }
}

/// Quota enforcement for one scope.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn AtomicStore>,
    scope: RateLimitScope,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AtomicStore>, scope: RateLimitScope, config: RateLimitConfig) -> Self {
        Self {
            store,
            scope,
            config,
        }
    }

    pub fn scope(&self) -> RateLimitScope {
        self.scope
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Backend key for `identifier`.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}:{}", self.config.prefix, hash_identifier(identifier))
    }

    /// Counts one request for `identifier`; backend errors are returned.
    pub async fn check(&self, identifier: &str) -> Result<RateLimitDecision> {
        let snapshot = hit(
            self.store.as_ref(),
            &self.config.prefix,
            identifier,
            self.config.window,
        )
        .await?;
        Ok(RateLimitDecision {
            limit: self.config.requests,
            current: snapshot.count,
            ttl: snapshot.ttl,
            window: self.config.window,
            checked_at: Utc::now(),
        })
    }

    /// Like [`check`](Self::check) but fails open: a backend error is logged
    /// and yields `None`, meaning the request must be allowed.
    pub async fn evaluate(&self, identifier: &str) -> Option<RateLimitDecision> {
        match self.check(identifier).await {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "rate limit backend unavailable, allowing request");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAtomicStore;

    fn decision(current: i64, ttl: Option<Duration>) -> RateLimitDecision {
        RateLimitDecision {
            limit: 5,
            current,
            ttl,
            window: Duration::from_secs(10),
            checked_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(decision(1, None).remaining(), 4);
        assert_eq!(decision(5, None).remaining(), 0);
        assert_eq!(decision(9, None).remaining(), 0);
        assert!(decision(5, None).allowed());
        assert!(!decision(6, None).allowed());
    }

    #[test]
    fn reset_falls_back_to_window_without_ttl() {
        let with_ttl = decision(1, Some(Duration::from_millis(2500)));
        assert_eq!(with_ttl.reset_at(), 1_700_000_002);
        assert_eq!(with_ttl.retry_after_secs(), 3);

        let without_ttl = decision(1, None);
        assert_eq!(without_ttl.reset_at(), 1_700_000_010);
        assert_eq!(without_ttl.retry_after_secs(), 10);

        assert_eq!(decision(1, Some(Duration::ZERO)).retry_after_secs(), 10);
    }

    #[tokio::test]
    async fn keys_hash_the_identifier() {
        let store = Arc::new(InMemoryAtomicStore::new());
        let limiter = RateLimiter::new(
            store,
            RateLimitScope::Token,
            RateLimitConfig::new(5, Duration::from_secs(10), "ratelimit:api"),
        );
        let key = limiter.key_for("tok-123");
        assert!(key.starts_with("ratelimit:api:"));
        assert!(!key.contains("tok-123"));
    }

    #[tokio::test]
    async fn scopes_use_independent_counters() {
        let store: Arc<dyn AtomicStore> = Arc::new(InMemoryAtomicStore::new());
        let window = Duration::from_secs(10);
        let by_ip = RateLimiter::new(
            Arc::clone(&store),
            RateLimitScope::Ip,
            RateLimitConfig::new(1, window, "ratelimit:ip"),
        );
        let by_token = RateLimiter::new(
            store,
            RateLimitScope::Token,
            RateLimitConfig::new(1, window, "ratelimit:api"),
        );

        assert!(by_ip.check("same").await.unwrap().allowed());
        assert!(by_token.check("same").await.unwrap().allowed());
        assert!(!by_ip.check("same").await.unwrap().allowed());
    }
}

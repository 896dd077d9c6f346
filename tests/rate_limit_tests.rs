/// Rate limiter tests
///
/// Fixed-window semantics, expiry set-once, fail-open and cross-process
/// counting against the in-process store.
/// Run with: cargo test --test rate_limit_tests

mod common;

use common::UnreachableStore;
use sessiongate::{
    AtomicStore, InMemoryAtomicStore, RateLimitConfig, RateLimitScope, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;

fn limiter(store: Arc<dyn AtomicStore>, limit: u32, window: Duration) -> RateLimiter {
    RateLimiter::new(
        store,
        RateLimitScope::Token,
        RateLimitConfig::new(limit, window, "ratelimit:api"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_sixth_call_in_window_is_rejected() {
    let store = Arc::new(InMemoryAtomicStore::new());
    let limiter = limiter(store, 5, Duration::from_secs(10));

    for expected_remaining in [4, 3, 2, 1, 0] {
        let decision = limiter.check("client-token").await.unwrap();
        assert!(decision.allowed());
        assert_eq!(decision.remaining(), expected_remaining);
    }

    let rejected = limiter.check("client-token").await.unwrap();
    assert!(!rejected.allowed());
    assert_eq!(rejected.remaining(), 0);
    assert!(rejected.retry_after_secs() <= 10);
    assert!(rejected.retry_after_secs() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_later_increment_does_not_extend_window() {
    let store = Arc::new(InMemoryAtomicStore::new());
    let limiter = limiter(Arc::clone(&store) as Arc<dyn AtomicStore>, 5, Duration::from_secs(10));
    let key = limiter.key_for("client-token");

    limiter.check("client-token").await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    let second = limiter.check("client-token").await.unwrap();
    assert_eq!(second.current, 2);
    assert_eq!(second.ttl, Some(Duration::from_secs(9)));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(store.ttl(&key).await.unwrap(), None);

    let fresh = limiter.check("client-token").await.unwrap();
    assert_eq!(fresh.current, 1);
    assert_eq!(fresh.remaining(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_window_reset_allows_again() {
    let store = Arc::new(InMemoryAtomicStore::new());
    let limiter = limiter(store, 1, Duration::from_secs(2));

    assert!(limiter.check("t").await.unwrap().allowed());
    assert!(!limiter.check("t").await.unwrap().allowed());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(limiter.check("t").await.unwrap().allowed());
}

#[tokio::test]
async fn test_backend_failure_fails_open() {
    let limiter = limiter(Arc::new(UnreachableStore), 1, Duration::from_secs(10));

    assert!(limiter.check("t").await.is_err());
    assert!(limiter.evaluate("t").await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_count_every_request() {
    let store: Arc<dyn AtomicStore> = Arc::new(InMemoryAtomicStore::new());
    let processes = 16;
    let calls_per_process = 25;

    // Each "process" has its own limiter instance sharing only the store.
    let mut handles = vec![];
    for _ in 0..processes {
        let limiter = limiter(Arc::clone(&store), 10_000, Duration::from_secs(60));
        handles.push(tokio::spawn(async move {
            let mut max_seen = 0;
            for _ in 0..calls_per_process {
                let decision = limiter.check("shared-token").await.unwrap();
                max_seen = max_seen.max(decision.current);
            }
            max_seen
        }));
    }

    let mut highest = 0;
    for handle in handles {
        highest = highest.max(handle.await.unwrap());
    }

    let total = (processes * calls_per_process) as i64;
    assert_eq!(highest, total);

    let observer = limiter(store, 10_000, Duration::from_secs(60));
    assert_eq!(observer.check("shared-token").await.unwrap().current, total + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_reject_exactly_over_limit() {
    let store: Arc<dyn AtomicStore> = Arc::new(InMemoryAtomicStore::new());
    let limit = 20;

    let mut handles = vec![];
    for _ in 0..50 {
        let limiter = limiter(Arc::clone(&store), limit, Duration::from_secs(60));
        handles.push(tokio::spawn(async move {
            limiter.check("burst").await.unwrap().allowed()
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, limit);
}

#![allow(dead_code)]

use async_trait::async_trait;
use sessiongate::{AtomicStore, CounterSnapshot, GatewayError, Result};
use std::time::Duration;

/// Backend that is always unreachable.
pub struct UnreachableStore;

fn down<T>() -> Result<T> {
    Err(GatewayError::Backend("connection refused".to_string()))
}

#[async_trait]
impl AtomicStore for UnreachableStore {
    async fn incr_with_expiry(&self, _key: &str, _window: Duration) -> Result<CounterSnapshot> {
        down()
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        down()
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
        down()
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> Result<bool> {
        down()
    }

    async fn push(&self, _list: &str, _value: String) -> Result<u64> {
        down()
    }

    async fn blocking_pop(&self, _list: &str, _timeout: Duration) -> Result<Option<String>> {
        down()
    }

    async fn list_len(&self, _list: &str) -> Result<u64> {
        down()
    }
}

use super::{AtomicStore, CounterSnapshot};
use crate::core::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout_at};
use tracing::debug;

#[derive(Debug)]
enum StoredValue {
    Counter(i64),
    Text(String),
    List(VecDeque<String>),
}

impl StoredValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Text(_) => "string",
            Self::List(_) => "list",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// In-process store with the same atomic semantics as the remote backend.
///
/// All mutations run under a single mutex, which gives each trait method the
/// atomicity a server-side script provides. Expiry is evaluated lazily on
/// access against `tokio::time::Instant`, so paused-clock tests can advance
/// past TTLs deterministically.
#[derive(Debug, Default)]
pub struct InMemoryAtomicStore {
    entries: Mutex<HashMap<String, Entry>>,
    list_pushed: Notify,
}

impl InMemoryAtomicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired key and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Purges expired keys every `every` until `shutdown` flips to true or
    /// its sender is dropped. Keys are otherwise only evicted when touched
    /// again, so a long-running process needs this to bound memory.
    pub fn spawn_purger(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
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
                        let purged = store.purge_expired().await;
                        if purged > 0 {
                            debug!(purged, "expired keys purged");
                        }
                    }
                }
            }
        })
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn wrong_type(key: &str, found: &StoredValue, wanted: &str) -> GatewayError {
        GatewayError::Backend(format!(
            "WRONGTYPE key '{}' holds a {}, expected {}",
            key,
            found.kind(),
            wanted
        ))
    }

    async fn try_pop(&self, list: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live(&mut entries, list, now) else {
            return Ok(None);
        };
        let popped = match &mut entry.value {
            StoredValue::List(items) => items.pop_back(),
            other => return Err(Self::wrong_type(list, other, "list")),
        };
        if matches!(&entry.value, StoredValue::List(items) if items.is_empty()) {
            entries.remove(list);
        }
        Ok(popped)
    }
}

#[async_trait]
impl AtomicStore for InMemoryAtomicStore {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<CounterSnapshot> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let count = match &mut entry.value {
                    StoredValue::Counter(count) => {
                        *count += 1;
                        *count
                    }
                    other => return Err(Self::wrong_type(key, other, "counter")),
                };
                Ok(CounterSnapshot {
                    count,
                    ttl: entry.remaining(now),
                })
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Counter(1),
                        expires_at: Some(now + window),
                    },
                );
                Ok(CounterSnapshot {
                    count: 1,
                    ttl: Some(window),
                })
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key, now).and_then(|e| e.remaining(now)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Text(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: StoredValue::Text(current),
                ..
            }) => current.as_str() == expected,
            _ => false,
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn push(&self, list: &str, value: String) -> Result<u64> {
        let now = Instant::now();
        let len = {
            let mut entries = self.entries.lock().await;
            match Self::live(&mut entries, list, now) {
                Some(entry) => match &mut entry.value {
                    StoredValue::List(items) => {
                        items.push_front(value);
                        items.len() as u64
                    }
                    other => return Err(Self::wrong_type(list, other, "list")),
                },
                None => {
                    entries.insert(
                        list.to_string(),
                        Entry {
                            value: StoredValue::List(VecDeque::from([value])),
                            expires_at: None,
                        },
                    );
                    1
                }
            }
        };
        self.list_pushed.notify_waiters();
        Ok(len)
    }

    async fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let pushed = self.list_pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(value) = self.try_pop(list).await? {
                return Ok(Some(value));
            }
            if timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, list, now) {
            Some(Entry {
                value: StoredValue::List(items),
                ..
            }) => Ok(items.len() as u64),
            Some(entry) => Err(Self::wrong_type(list, &entry.value, "list")),
            None => Ok(0),
        }
    }
}

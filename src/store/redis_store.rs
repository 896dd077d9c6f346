use super::{AtomicStore, CounterSnapshot};
use crate::core::{GatewayError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

// BRPOP treats 0 as "block forever"; never send less than this.
const MIN_BLOCK_SECS: f64 = 0.01;

lazy_static! {
    /// INCR + first-write PEXPIRE + PTTL as one server-side unit.
    static ref INCR_WITH_EXPIRY: Script = Script::new(
        r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
local ttl = redis.call("PTTL", KEYS[1])
return {current, ttl}
"#
    );

    /// GET + compare + DEL as one server-side unit.
    static ref COMPARE_AND_DELETE: Script = Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#
    );
}

// Idle blocking connections kept for reuse; one per concurrent popper is
// enough for a worker pool.
const MAX_IDLE_BLOCKING: usize = 32;

/// Connections checked out for exclusive use and returned when healthy.
#[derive(Debug)]
struct IdlePool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T> IdlePool<T> {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    async fn take(&self) -> Option<T> {
        self.idle.lock().await.pop()
    }

    /// Returns `conn` to the pool; dropped if the pool is full.
    async fn put(&self, conn: T) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    #[cfg(test)]
    async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}

fn ttl_from_millis(ms: i64) -> Option<Duration> {
    // PTTL: -1 no expiry, -2 missing key.
    (ms > 0).then(|| Duration::from_millis(ms as u64))
}

fn millis(duration: Duration) -> Result<u64> {
    let ms = duration.as_millis();
    if ms == 0 {
        return Err(GatewayError::InvalidInput(
            "expiry must be at least one millisecond".to_string(),
        ));
    }
    u64::try_from(ms).map_err(|_| GatewayError::InvalidInput("expiry out of range".to_string()))
}

/// Redis-backed [`AtomicStore`].
///
/// Regular commands share one multiplexed [`ConnectionManager`], which
/// reconnects on failure. Blocking pops each hold a connection of their own,
/// since a blocked multiplexed connection would stall every other command.
/// Those connections are reused across pops and dropped after an error.
#[derive(Clone)]
pub struct RedisAtomicStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Arc<IdlePool<MultiplexedConnection>>,
}

impl RedisAtomicStore {
    /// Connects to `url` (`redis://[:password@]host[:port][/db]`) and loads
    /// the atomic scripts.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let store = Self {
            client,
            conn,
            blocking: Arc::new(IdlePool::new(MAX_IDLE_BLOCKING)),
        };
        store.ping().await?;
        store.load_scripts().await?;
        info!("redis coordination backend connected");
        Ok(store)
    }

    async fn load_scripts(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        for script in [&*INCR_WITH_EXPIRY, &*COMPARE_AND_DELETE] {
            let _: String = script.prepare_invoke().load_async(&mut conn).await?;
        }
        Ok(())
    }

    /// Round trip on the shared connection; used as the startup health check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl AtomicStore for RedisAtomicStore {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<CounterSnapshot> {
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (i64, i64) = INCR_WITH_EXPIRY
            .key(key)
            .arg(millis(window)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(CounterSnapshot {
            count,
            ttl: ttl_from_millis(ttl_ms),
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl_from_millis(ms))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl)?)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn push(&self, list: &str, value: String) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LPUSH")
            .arg(list)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = match self.blocking.take().await {
            Some(conn) => conn,
            None => {
                debug!("opening blocking redis connection");
                self.client.get_multiplexed_async_connection().await?
            }
        };
        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(list)
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query_async(&mut conn)
            .await?;
        self.blocking.put(conn).await;
        Ok(reply.map(|(_, value)| value))
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN").arg(list).query_async(&mut conn).await?;
        Ok(len)
    }
}

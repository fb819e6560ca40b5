use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{KeyValueStore, StoreError};
use crate::metrics::STORE_OPERATIONS;

/// ARGV[1]: "1" when a current value is expected, "0" when the key must be absent
/// ARGV[2]: expected value, ARGV[3]: new value, ARGV[4]: TTL in seconds (0 = none)
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
else
  if current then return 0 end
end
if tonumber(ARGV[4]) > 0 then
  redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
else
  redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

/// Redis-backed store. Every command is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(backend)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout("connect".to_string()))?
            .map_err(backend)?;

        let store = Self { conn, timeout };
        store.ping().await?;
        debug!("Redis connection established");
        Ok(store)
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        STORE_OPERATIONS.inc();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(backend),
            Err(_) => Err(StoreError::Timeout(op.to_string())),
        }
    }
}

fn backend(err: RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn ttl_secs(ttl: Option<Duration>) -> u64 {
    // Redis rejects EX 0; round sub-second TTLs up.
    ttl.map(|d| d.as_secs().max(1)).unwrap_or(0)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("GET", async move { conn.get(key).await }).await
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl);
        self.bounded("SET", async move {
            if secs > 0 {
                conn.set_ex(key, value, secs).await
            } else {
                conn.set(key, value).await
            }
        })
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl);
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if secs > 0 {
            cmd.arg("EX").arg(secs);
        }
        let result: Option<String> = self
            .bounded("SET NX", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(result.is_some())
    }

    #[instrument(skip(self, expected, new))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(CAS_SCRIPT);
        let mut invocation = script.key(key);
        invocation
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(new)
            .arg(ttl_secs(ttl));
        let written: i64 = self
            .bounded("CAS", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("DEL", async move { conn.del(key).await }).await
    }

    #[instrument(skip(self))]
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut keys: Vec<String> = self
            .bounded("SCAN", async move {
                let mut iter = conn.scan_match::<_, String>(pattern).await?;
                let mut found = Vec::new();
                while let Some(key) = iter.next_item().await {
                    found.push(key);
                }
                Ok(found)
            })
            .await?;
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded("PING", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}

// Exercising RedisStore requires a running Redis instance; the store contract
// is covered against InMemoryStore.

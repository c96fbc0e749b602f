//! Redis-backed counter store.
//!
//! Every counter is a sorted set scored by observation time in epoch
//! milliseconds. Record-and-count runs as a `MULTI/EXEC` pipeline:
//!
//! ```text
//! ZADD             key <now_ms> <member>
//! ZREMRANGEBYSCORE key -inf (<now_ms - window_ms>
//! ZCARD            key
//! PEXPIRE          key <2 * window_ms>
//! ```
//!
//! Quota reservations need a conditional insert, which a transaction cannot
//! express, so they run as one Lua script instead.
//!
//! The connection is opened lazily through a `ConnectionManager`, which
//! reconnects on its own after failures. Each call clones the manager; clones
//! share one multiplexed connection, so concurrent tier checks are not
//! serialised behind a lock.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{
    key_ttl_ms, window_start, CounterKey, CounterStore, Observation, ReserveOutcome, StoreError,
};
use crate::error::{Result, TollgateError};

const RESERVE_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
if count >= tonumber(ARGV[3]) then
  local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
  if oldest[2] then
    return {0, count, tonumber(oldest[2])}
  end
  return {0, count, -1}
end
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return {1, count + 1, -1}
";

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_timeout() {
            StoreError::Unavailable(format!("timed out: {e}"))
        } else if e.kind() == redis::ErrorKind::TypeError {
            StoreError::Protocol(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

/// Counter store shared by every gate instance pointing at the same Redis.
pub struct RedisCounterStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    reserve_script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Parse the URL without connecting.
    ///
    /// # Errors
    /// Returns a configuration error if the URL is not a valid Redis URL.
    pub fn open(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| TollgateError::Config(format!("Invalid redis url '{url}': {e}")))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: key_prefix.into(),
            reserve_script: Script::new(RESERVE_SCRIPT),
        })
    }

    /// Parse the URL and establish the connection eagerly.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let store = Self::open(url, key_prefix)?;
        store.connection().await?;
        Ok(store)
    }

    async fn connection(&self) -> std::result::Result<ConnectionManager, StoreError> {
        let conn = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    fn key(&self, key: &CounterKey) -> String {
        key.render(&self.key_prefix)
    }
}

fn ttl_arg(window: Duration) -> i64 {
    i64::try_from(key_ttl_ms(window)).unwrap_or(i64::MAX)
}

fn exclusive_below(now_ms: u64, window: Duration) -> String {
    format!("({}", window_start(now_ms, window))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_and_count(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> std::result::Result<u64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zadd(&key, &observation.member, observation.at_ms)
            .ignore()
            .zrembyscore(&key, "-inf", exclusive_below(observation.at_ms, window))
            .ignore()
            .zcard(&key)
            .pexpire(&key, ttl_arg(window))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn count(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
    ) -> std::result::Result<u64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let (count,): (u64,) = redis::pipe()
            .zcount(&key, window_start(now_ms, window), "+inf")
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn record(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> std::result::Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let () = redis::pipe()
            .atomic()
            .zadd(&key, &observation.member, observation.at_ms)
            .ignore()
            .zrembyscore(&key, "-inf", exclusive_below(observation.at_ms, window))
            .ignore()
            .pexpire(&key, ttl_arg(window))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn reserve(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
        limit: u64,
    ) -> std::result::Result<ReserveOutcome, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let (reserved, count, oldest): (i64, i64, i64) = self
            .reserve_script
            .key(&key)
            .arg(observation.at_ms)
            .arg(exclusive_below(observation.at_ms, window))
            .arg(limit)
            .arg(&observation.member)
            .arg(ttl_arg(window))
            .invoke_async(&mut conn)
            .await?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative count {count}")))?;

        if reserved == 1 {
            Ok(ReserveOutcome::Reserved { count })
        } else {
            Ok(ReserveOutcome::Exhausted { count, oldest_ms: u64::try_from(oldest).ok() })
        }
    }

    async fn nth_oldest(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        rank: u64,
    ) -> std::result::Result<Option<u64>, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;
        let offset = isize::try_from(rank).unwrap_or(isize::MAX);

        let entries: Vec<(String, u64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(&key)
            .arg(window_start(now_ms, window))
            .arg("+inf")
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(offset)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        Ok(entries.first().map(|(_, at)| *at))
    }

    async fn release(&self, key: &CounterKey, member: &str) -> std::result::Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let (_removed,): (u64,) = redis::pipe().zrem(&key, member).query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> std::result::Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply '{pong}'")))
        }
    }
}

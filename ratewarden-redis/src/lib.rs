//! Redis counter store for `ratewarden` (companion crate).
//! Plug a [`RedisCounterStore`] into `ratewarden::DistributedFixedWindow` to share one
//! quota per key across every process talking to the same Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratewarden::CounterStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

/// INCR and arm the expiry in one server-side step, so a crash between the two can never
/// leave a counter without a TTL and concurrent callers can never both see `1`. A counter
/// found without a TTL (written by something else) is given one too.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Longest expiry sent to Redis (about 100 years). PEXPIRE rejects values that overflow
/// once added to the server's clock, and a rejected PEXPIRE would run after the INCR.
pub const MAX_TTL_MILLIS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// [`CounterStore`] backed by Redis through a reconnecting [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    increment: Arc<Script>,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or the first connection attempt fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        Self::from_client(client).await
    }

    /// Use an existing client.
    pub async fn from_client(client: redis::Client) -> Result<Self, RedisError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn))
    }

    /// Use an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn, increment: Arc::new(Script::new(INCREMENT_SCRIPT)) }
    }

    /// Round-trip a PING. Useful as a startup check.
    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::debug!(target: "ratewarden::redis", reply = %pong, "redis reachable");
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    // PEXPIRE rejects 0; the limiter never asks for sub-millisecond windows anyway.
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    type Error = RedisError;

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error> {
        let mut conn = self.conn.clone();
        self.increment.key(key).arg(ttl_millis(ttl)).invoke_async(&mut conn).await
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        let mut conn = self.conn.clone();
        // -2: no such key, -1: no expiry.
        let millis: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_millis, Clock, MonotonicClock};

/// Abstract interface for a shared counter store with expiry (e.g., Redis).
///
/// Every method must be atomic with respect to concurrent callers, including callers in
/// other processes when the store is shared over the network.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Atomically increment the counter for `key` and return the post-increment value.
    ///
    /// When the increment takes the counter from unset to `1`, the counter is set to expire
    /// after `ttl`. Later increments leave the expiry untouched. Both steps happen as one
    /// atomic operation, so a counter can never be left without an expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error>;

    /// Current value, `None` if the counter is unset or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error>;

    /// Remaining time to live, `None` if the counter is unset or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error>;

    /// Delete the counter. Deleting an unset counter is not an error.
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: u64,
}

#[derive(Debug, Default)]
struct Counters {
    by_key: HashMap<String, Counter>,
    // clock reading at which `increment` next drops expired counters
    next_purge: u64,
}

impl Counters {
    fn purge(&mut self, now: u64) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|_, c| c.expires_at > now);
        before - self.by_key.len()
    }
}

/// In-memory counter store for tests and single-process deployments.
///
/// Expired counters are treated as unset on access. `increment` drops them in bulk at
/// most once per TTL it is given, so abandoned keys do not accumulate;
/// [`InMemoryCounterStore::purge_expired`] reclaims them on demand.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    // the mutex is held only for map work, never across an await
    data: Arc<tokio::sync::Mutex<Counters>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive expiry from a custom clock.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(tokio::sync::Mutex::new(Counters::default())), clock: Arc::new(clock) }
    }

    /// Drop every expired counter. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.data.lock().await.purge(now)
    }

    /// Number of counters held, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.data.lock().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.by_key.is_empty()
    }

    fn live(counter: Option<&Counter>, now: u64) -> Option<Counter> {
        counter.filter(|c| c.expires_at > now).copied()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    type Error = std::convert::Infallible;

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error> {
        let now = self.clock.now_millis();
        let ttl = duration_millis(ttl);
        let mut guard = self.data.lock().await;
        if now >= guard.next_purge {
            guard.purge(now);
            guard.next_purge = now.saturating_add(ttl);
        }
        match guard.by_key.get_mut(key) {
            Some(counter) if counter.expires_at > now => {
                counter.value = counter.value.saturating_add(1);
                Ok(counter.value)
            }
            _ => {
                let expires_at = now.saturating_add(ttl);
                guard.by_key.insert(key.to_owned(), Counter { value: 1, expires_at });
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error> {
        let now = self.clock.now_millis();
        let guard = self.data.lock().await;
        Ok(Self::live(guard.by_key.get(key), now).map(|c| c.value))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        let now = self.clock.now_millis();
        let guard = self.data.lock().await;
        Ok(Self::live(guard.by_key.get(key), now).map(|c| Duration::from_millis(c.expires_at - now)))
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.data.lock().await.by_key.remove(key);
        Ok(())
    }
}

//! Fixed-window limiting over a shared [`CounterStore`].
//!
//! Every process pointing at the same store enforces one quota per key. A request is one
//! atomic increment: the store returns the post-increment count and arms the window's
//! expiry when the count is fresh, and the request is admitted iff that count is within
//! the limit. There is no read-then-write step for concurrent callers to race through.
//!
//! Any store failure or timeout denies the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, Strategy, TierConfig};
use crate::adaptive::DynamicConfig;
use crate::error::LimiterError;
use crate::telemetry::{AdmissionEvent, BackendEvent, LimiterEvent, NonBlockingSink};

/// Prefix prepended to every rate-limit key in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit:";

/// Events queued for a sink before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Upper bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Shared-store fixed-window limiter.
///
/// Per-key tier overrides live in a [`DynamicConfig`] cell, so they can be changed while
/// traffic is flowing without a lock on the request path.
pub struct DistributedFixedWindow<C> {
    store: Arc<C>,
    default_tier: TierConfig,
    overrides: DynamicConfig<HashMap<String, TierConfig>>,
    prefix: Arc<str>,
    timeout: Duration,
    sink: Option<NonBlockingSink>,
}

impl<C> Clone for DistributedFixedWindow<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            default_tier: self.default_tier,
            overrides: self.overrides.clone(),
            prefix: self.prefix.clone(),
            timeout: self.timeout,
            sink: self.sink.clone(),
        }
    }
}

impl<C> std::fmt::Debug for DistributedFixedWindow<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedFixedWindow")
            .field("default_tier", &self.default_tier)
            .field("overrides", &self.overrides.get().len())
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<C: CounterStore> DistributedFixedWindow<C> {
    pub fn new(store: C, default_tier: TierConfig) -> Self {
        Self::from_arc(Arc::new(store), default_tier)
    }

    /// Share an existing store handle.
    pub fn from_arc(store: Arc<C>, default_tier: TierConfig) -> Self {
        Self {
            store,
            default_tier,
            overrides: DynamicConfig::default(),
            prefix: Arc::from(DEFAULT_KEY_PREFIX),
            timeout: DEFAULT_STORE_TIMEOUT,
            sink: None,
        }
    }

    /// Namespace for keys in the shared store.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Arc::from(prefix.into());
        self
    }

    /// Bound on each store round trip. A zero timeout is raised to one millisecond.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Report decisions and backend failures to `sink`.
    ///
    /// Events go through a bounded queue drained by a worker task, so a slow sink never
    /// delays a request. Must be called inside a tokio runtime.
    pub fn with_sink<S>(self, sink: S) -> Self
    where
        S: tower::Service<LimiterEvent, Response = ()> + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        self.with_sink_capacity(sink, DEFAULT_EVENT_CAPACITY)
    }

    /// [`with_sink`](Self::with_sink) with an explicit event queue bound.
    pub fn with_sink_capacity<S>(mut self, sink: S, capacity: usize) -> Self
    where
        S: tower::Service<LimiterEvent, Response = ()> + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        self.sink = Some(NonBlockingSink::with_capacity(sink, capacity));
        self
    }

    /// A limiter over the same store, prefix, timeout and sink with a different default
    /// tier and no overrides.
    pub fn with_tier(&self, tier: TierConfig) -> Self {
        Self {
            store: self.store.clone(),
            default_tier: tier,
            overrides: DynamicConfig::default(),
            prefix: self.prefix.clone(),
            timeout: self.timeout,
            sink: self.sink.clone(),
        }
    }

    /// Govern `key` by `tier` from the next request on. Replaces an existing override.
    pub fn set_premium_client(&self, key: impl Into<String>, tier: TierConfig) {
        let key = key.into();
        self.overrides.update(|current| {
            let mut next = current.clone();
            next.insert(key.clone(), tier);
            next
        });
        tracing::info!(target: "ratewarden::distributed", key = %key, tier = %tier, "premium tier set");
    }

    /// The override for `key`, if any.
    pub fn premium_tier(&self, key: &str) -> Option<TierConfig> {
        self.overrides.get().get(key).copied()
    }

    /// Effective tier for `key`: its override, else the default.
    pub fn tier_for(&self, key: &str) -> TierConfig {
        self.premium_tier(key).unwrap_or(self.default_tier)
    }

    pub fn default_tier(&self) -> TierConfig {
        self.default_tier
    }

    /// The key used in the shared store for `key`.
    pub fn counter_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Requests counted so far in `key`'s current window (0 if none).
    pub async fn current_count(&self, key: &str) -> Result<u64, LimiterError> {
        let counter = self.counter_key(key);
        Ok(self.guarded(self.store.get(&counter)).await?.unwrap_or(0))
    }

    /// Time until `key`'s current window expires, `None` if it has no window.
    pub async fn time_to_reset(&self, key: &str) -> Result<Option<Duration>, LimiterError> {
        let counter = self.counter_key(key);
        self.guarded(self.store.ttl(&counter)).await
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, LimiterError>
    where
        F: std::future::Future<Output = Result<T, C::Error>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LimiterError::Store(e.to_string())),
            Err(_) => Err(LimiterError::StoreTimeout { timeout: self.timeout }),
        }
    }
}

#[async_trait]
impl<C> Strategy for DistributedFixedWindow<C>
where
    C: CounterStore + 'static,
{
    async fn allow(&self, key: &str) -> bool {
        let tier = self.tier_for(key);
        let counter = self.counter_key(key);
        let event = match self.guarded(self.store.increment(&counter, tier.window())).await {
            Ok(count) if count <= tier.limit() => {
                tracing::debug!(target: "ratewarden::distributed", key, count, limit = tier.limit(), "admitted");
                LimiterEvent::Admission(AdmissionEvent::Admitted {
                    key: key.to_owned(),
                    count,
                    limit: tier.limit(),
                })
            }
            Ok(count) => {
                tracing::debug!(target: "ratewarden::distributed", key, count, limit = tier.limit(), "quota exhausted");
                LimiterEvent::Admission(AdmissionEvent::Denied { key: key.to_owned(), limit: tier.limit() })
            }
            Err(e) => {
                tracing::warn!(target: "ratewarden::distributed", key, error = %e, "counter store failed, denying request");
                let backend = match e {
                    LimiterError::StoreTimeout { timeout } => {
                        BackendEvent::TimedOut { key: key.to_owned(), timeout }
                    }
                    other => BackendEvent::Unavailable { key: key.to_owned(), error: other.to_string() },
                };
                LimiterEvent::Backend(backend)
            }
        };
        let admitted = matches!(event, LimiterEvent::Admission(AdmissionEvent::Admitted { .. }));
        if let Some(sink) = &self.sink {
            sink.try_emit(event);
        }
        admitted
    }

    async fn reset(&self, key: &str) {
        let counter = self.counter_key(key);
        if let Err(e) = self.guarded(self.store.delete(&counter)).await {
            tracing::warn!(target: "ratewarden::distributed", key, error = %e, "reset failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::InMemoryCounterStore;

    fn tier(limit: u64, window: Duration) -> TierConfig {
        TierConfig::new(limit, window).unwrap()
    }

    #[test]
    fn counter_key_uses_prefix() {
        let limiter = DistributedFixedWindow::new(InMemoryCounterStore::new(), tier(1, Duration::from_secs(1)));
        assert_eq!(limiter.counter_key("abc"), "rate_limit:abc");
        let limiter = limiter.with_prefix("rw/");
        assert_eq!(limiter.counter_key("abc"), "rw/abc");
    }

    #[tokio::test]
    async fn premium_override_takes_effect_immediately() {
        let limiter = DistributedFixedWindow::new(InMemoryCounterStore::new(), tier(1, Duration::from_secs(60)));
        assert!(limiter.allow("vip").await);
        assert!(!limiter.allow("vip").await);
        limiter.set_premium_client("vip", tier(3, Duration::from_secs(60)));
        assert_eq!(limiter.tier_for("vip").limit(), 3);
        assert!(limiter.allow("vip").await);
        assert!(!limiter.allow("vip").await);
    }

    #[tokio::test]
    async fn monitoring_reads() {
        let clock = ManualClock::new();
        let limiter = DistributedFixedWindow::new(
            InMemoryCounterStore::with_clock(clock.clone()),
            tier(5, Duration::from_secs(10)),
        );
        assert_eq!(limiter.current_count("k").await.unwrap(), 0);
        assert_eq!(limiter.time_to_reset("k").await.unwrap(), None);
        limiter.allow("k").await;
        limiter.allow("k").await;
        clock.advance(Duration::from_secs(4));
        assert_eq!(limiter.current_count("k").await.unwrap(), 2);
        assert_eq!(limiter.time_to_reset("k").await.unwrap(), Some(Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn derived_tier_shares_store() {
        let limiter = DistributedFixedWindow::new(InMemoryCounterStore::new(), tier(1, Duration::from_secs(60)));
        let wide = limiter.with_tier(tier(10, Duration::from_secs(60)));
        assert!(limiter.allow("k").await);
        assert!(wide.allow("k").await);
        assert_eq!(wide.current_count("k").await.unwrap(), 2);
        assert!(!limiter.allow("k").await);
    }

    #[test]
    fn zero_timeout_is_raised() {
        let limiter = DistributedFixedWindow::new(InMemoryCounterStore::new(), tier(1, Duration::from_secs(1)))
            .with_store_timeout(Duration::ZERO);
        assert!(format!("{limiter:?}").contains("timeout: 1ms"));
    }

    #[derive(Clone)]
    struct Stuck;

    impl tower::Service<LimiterEvent> for Stuck {
        type Response = ();
        type Error = std::convert::Infallible;
        type Future = std::future::Ready<Result<(), Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Pending
        }

        fn call(&mut self, _event: LimiterEvent) -> Self::Future {
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn stuck_sink_never_delays_decisions() {
        let limiter = DistributedFixedWindow::new(InMemoryCounterStore::new(), tier(3, Duration::from_secs(60)))
            .with_sink_capacity(Stuck, 1);
        let decisions = tokio::time::timeout(Duration::from_secs(5), async {
            let mut admitted = 0;
            for _ in 0..10 {
                admitted += usize::from(limiter.allow("k").await);
            }
            admitted
        });
        assert_eq!(decisions.await.unwrap(), 3);
    }
}

//! Tier dispatcher.
//!
//! [`RateLimiter`] routes every key to one [`Strategy`]: a premium override registered
//! for that key, or the process-wide default. The override map is owned by a single task.
//! Lookups and installs are queued to it and applied in order, so an install can never
//! race with a lookup. The task answers a lookup with the strategy handle and the actual
//! `allow`/`reset` runs in the caller's task. A slow strategy (a shared store round trip)
//! never holds up routing for other keys.
//!
//! An `allow` racing with an install for the same key sees either the old or the new
//! strategy, whichever the owner processed first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::fixed_window::DEFAULT_QUEUE_CAPACITY;
use super::{FixedWindow, Strategy, TierConfig};
use crate::error::LimiterError;
use crate::telemetry::{LimiterEvent, NonBlockingSink, NullSink, TierEvent};

/// Builds the strategy installed by [`RateLimiter::set_premium_client`].
pub type TierFactory = Arc<dyn Fn(TierConfig) -> Arc<dyn Strategy> + Send + Sync>;

enum Command {
    Resolve { key: String, reply: oneshot::Sender<Arc<dyn Strategy>> },
    Install { key: String, strategy: Arc<dyn Strategy>, reply: oneshot::Sender<bool> },
    PremiumKeys { reply: oneshot::Sender<Vec<String>> },
}

/// Handle to the tier dispatcher. Clones share the same owner.
#[derive(Clone)]
pub struct RateLimiter {
    tx: mpsc::Sender<Command>,
    factory: TierFactory,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tx", &self.tx)
            .field("factory", &"<fn(TierConfig) -> Arc<dyn Strategy>>")
            .finish()
    }
}

impl RateLimiter {
    /// Dispatcher with `default` for every key without an override. Premium tiers are
    /// built as in-process [`FixedWindow`]s. Must be called inside a tokio runtime.
    pub fn new(default: impl Strategy + 'static) -> Self {
        Self::builder(default).spawn()
    }

    pub fn builder(default: impl Strategy + 'static) -> RateLimiterBuilder<NullSink> {
        RateLimiterBuilder {
            default: Arc::new(default),
            factory: Arc::new(|tier: TierConfig| Arc::new(FixedWindow::new(tier)) as Arc<dyn Strategy>),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink: NullSink,
        }
    }

    /// Admit or deny one request for `key` under its effective tier.
    ///
    /// Fails closed if the dispatcher's owner is gone.
    pub async fn allow(&self, key: &str) -> bool {
        match self.resolve(key).await {
            Ok(strategy) => strategy.allow(key).await,
            Err(e) => {
                tracing::warn!(target: "ratewarden::dispatcher", key, error = %e, "denying request");
                false
            }
        }
    }

    /// [`allow`](Self::allow) bounded by `deadline`. An elapsed deadline is a denial.
    pub async fn allow_within(&self, key: &str, deadline: Duration) -> bool {
        match tokio::time::timeout(deadline, self.allow(key)).await {
            Ok(admitted) => admitted,
            Err(_) => {
                tracing::warn!(target: "ratewarden::dispatcher", key, ?deadline, "admission deadline elapsed, denying request");
                false
            }
        }
    }

    /// Clear `key`'s accounting in its effective strategy.
    pub async fn reset(&self, key: &str) {
        match self.resolve(key).await {
            Ok(strategy) => strategy.reset(key).await,
            Err(e) => tracing::warn!(target: "ratewarden::dispatcher", key, error = %e, "reset dropped"),
        }
    }

    /// Govern `key` by `limit` requests per `window`, built with the tier factory.
    ///
    /// # Errors
    /// [`LimiterError::InvalidTier`] if the tier is malformed (nothing is installed), or
    /// [`LimiterError::OwnerUnavailable`] if the dispatcher has stopped.
    pub async fn set_premium_client(
        &self,
        key: impl Into<String>,
        limit: u64,
        window: Duration,
    ) -> Result<(), LimiterError> {
        let tier = TierConfig::new(limit, window)?;
        self.set_premium_tier(key, tier).await
    }

    /// Like [`set_premium_client`](Self::set_premium_client) with an already validated tier.
    pub async fn set_premium_tier(&self, key: impl Into<String>, tier: TierConfig) -> Result<(), LimiterError> {
        let strategy = (self.factory)(tier);
        self.set_premium_strategy(key, strategy).await
    }

    /// Install an arbitrary strategy as `key`'s override.
    pub async fn set_premium_strategy(
        &self,
        key: impl Into<String>,
        strategy: Arc<dyn Strategy>,
    ) -> Result<(), LimiterError> {
        let key = key.into();
        self.submit(|reply| Command::Install { key, strategy, reply }).await.map(|_| ())
    }

    /// Keys with an override, sorted.
    pub async fn premium_keys(&self) -> Result<Vec<String>, LimiterError> {
        self.submit(|reply| Command::PremiumKeys { reply }).await
    }

    async fn resolve(&self, key: &str) -> Result<Arc<dyn Strategy>, LimiterError> {
        self.submit(|reply| Command::Resolve { key: key.to_owned(), reply }).await
    }

    async fn submit<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LimiterError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).await.map_err(|_| LimiterError::OwnerUnavailable)?;
        rx.await.map_err(|_| LimiterError::OwnerUnavailable)
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<S> {
    default: Arc<dyn Strategy>,
    factory: TierFactory,
    queue_capacity: usize,
    sink: S,
}

impl<S> RateLimiterBuilder<S> {
    /// How `set_premium_client` turns a tier into a strategy.
    pub fn tier_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(TierConfig) -> Arc<dyn Strategy> + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Bound on queued routing operations (minimum 1).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Report override installs to `sink`, through a bounded queue and worker task.
    pub fn sink<T>(self, sink: T) -> RateLimiterBuilder<T> {
        RateLimiterBuilder {
            default: self.default,
            factory: self.factory,
            queue_capacity: self.queue_capacity,
            sink,
        }
    }

    /// Spawn the owner task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> RateLimiter
    where
        S: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let sink = NonBlockingSink::with_capacity(self.sink, self.queue_capacity);
        let owner = Owner { rx, default: self.default, overrides: HashMap::new(), sink };
        tokio::spawn(owner.run());
        RateLimiter { tx, factory: self.factory }
    }
}

struct Owner {
    rx: mpsc::Receiver<Command>,
    default: Arc<dyn Strategy>,
    overrides: HashMap<String, Arc<dyn Strategy>>,
    sink: NonBlockingSink,
}

impl Owner {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Resolve { key, reply } => {
                    let strategy = self.overrides.get(&key).unwrap_or(&self.default).clone();
                    let _ = reply.send(strategy);
                }
                Command::Install { key, strategy, reply } => {
                    let replaced = self.overrides.insert(key.clone(), strategy).is_some();
                    let _ = reply.send(replaced);
                    tracing::info!(target: "ratewarden::dispatcher", key = %key, replaced, "premium tier installed");
                    self.sink.try_emit(LimiterEvent::Tier(TierEvent::Installed { key, replaced }));
                }
                Command::PremiumKeys { reply } => {
                    let mut keys: Vec<String> = self.overrides.keys().cloned().collect();
                    keys.sort();
                    let _ = reply.send(keys);
                }
            }
        }
        tracing::debug!(target: "ratewarden::dispatcher", "owner stopped, all handles dropped");
    }
}

//! Rate limiting engine.
//!
//! This module provides the building blocks for admission control:
//! - [`Strategy`]: the capability every limiter offers (`allow` / `reset`).
//! - [`FixedWindow`]: in-process fixed-window counting, owned by a single task.
//! - [`DistributedFixedWindow`]: the same policy over a shared [`CounterStore`], so several
//!   processes enforce one quota per key.
//! - [`RateLimiter`]: the tier dispatcher that routes each key to its default or premium
//!   strategy.
//! - [`AdmissionLayer`]: Tower middleware that extracts a key from each HTTP request and
//!   answers 429 when the dispatcher says no.
//!
//! # Architecture
//!
//! Mutable shared state has exactly one owner. The bucket map of a `FixedWindow` and the
//! override map of a `RateLimiter` each live inside a spawned task; callers talk to it over
//! a bounded channel and wait on a oneshot reply. There are no locks on the hot path and
//! every operation on a given map is totally ordered by its queue.
//!
//! The shared store variant has no local state to protect: atomicity comes from the store's
//! increment-and-arm-expiry primitive.
//!
//! # Failure policy
//!
//! Every limiter fails closed. If an owner task is gone or the shared store errors or
//! times out, `allow` returns `false` and the failure is logged and reported to telemetry.

use async_trait::async_trait;

pub mod bucket;
pub mod dispatcher;
pub mod distributed;
pub mod fixed_window;
pub mod middleware;
pub mod store;
pub mod tier;

pub use bucket::{Admission, Bucket, BucketStore};
pub use dispatcher::{RateLimiter, RateLimiterBuilder, TierFactory};
pub use distributed::DistributedFixedWindow;
pub use fixed_window::{FixedWindow, FixedWindowBuilder};
pub use middleware::{
    AdmissionLayer, AdmissionService, ApiKeyExtractor, IpKeyExtractor, KeyExtractor, PeerAddr,
};
pub use store::{CounterStore, InMemoryCounterStore};
pub use tier::TierConfig;

/// Anything that can decide whether a key may make one more request right now.
///
/// Implementations must be safe to call from many tasks at once and must never hang: a
/// limiter that cannot reach its state answers `false`.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Try to admit one request for `key`. `true` iff admitted.
    async fn allow(&self, key: &str) -> bool;

    /// Forget all accounting for `key`. Unknown keys are a no-op.
    async fn reset(&self, key: &str);
}

#[async_trait]
impl<T: Strategy + ?Sized> Strategy for std::sync::Arc<T> {
    async fn allow(&self, key: &str) -> bool {
        (**self).allow(key).await
    }

    async fn reset(&self, key: &str) {
        (**self).reset(key).await
    }
}

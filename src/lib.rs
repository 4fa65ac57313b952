#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # ratewarden
//!
//! Admission control for async Rust services: decide, per request, whether a caller may
//! proceed under a request quota per time window, with per-key premium tiers.
//!
//! ## Features
//!
//! - **Fixed-window limiting** in process, owned by a single task instead of a lock
//! - **Shared quotas** across processes over an atomic counter store with expiry
//!   (Redis via the `ratewarden-redis` crate)
//! - **Premium tiers** routed by a dispatcher that can be reconfigured under traffic
//! - **Tower middleware** that answers `429` with an `x-ratelimit-exceeded` marker
//! - **Fail-closed** everywhere: an unreachable backend never means unlimited quota
//! - **Telemetry** events through pluggable `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use ratewarden::{FixedWindow, RateLimiter, TierConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let basic = FixedWindow::new(TierConfig::per_minute(10).unwrap());
//!     let limiter = RateLimiter::new(basic);
//!     limiter
//!         .set_premium_client("premium-api-key", 100, Duration::from_secs(60))
//!         .await
//!         .unwrap();
//!
//!     assert!(limiter.allow("premium-api-key").await);
//!     assert!(limiter.allow("203.0.113.7").await);
//! }
//! ```

pub mod adaptive;
pub mod clock;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{LimiterError, TierError};
pub use rate_limit::{
    AdmissionLayer, CounterStore, DistributedFixedWindow, FixedWindow, InMemoryCounterStore,
    RateLimiter, Strategy, TierConfig,
};

//! Telemetry for the limiters.
//!
//! Strategies and the dispatcher describe what they did as [`LimiterEvent`]s. Events flow
//! through `TelemetrySink` implementations which can log, aggregate, or forward them.
//!
//! # Event Types
//!
//! - **Admission**: `Admitted`, `Denied`
//! - **Backend**: `Unavailable`, `TimedOut` (shared store failures, always a denial)
//! - **Janitor**: `Swept`
//! - **Tier**: `Installed`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<LimiterEvent>` for composability.
//!
//! ```rust
//! use ratewarden::telemetry::{AdmissionEvent, LimiterEvent};
//!
//! let event = LimiterEvent::Admission(AdmissionEvent::Denied { key: "abc".into(), limit: 10 });
//! assert_eq!(event.to_string(), "Denied(key=abc, limit=10)");
//! ```
//!
//! Emission never influences a decision: the caller already has its answer when the
//! event is handed to the sink, and a failing sink is ignored.

pub mod events;
pub mod sinks;

#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use events::{AdmissionEvent, BackendEvent, JanitorEvent, LimiterEvent, TierEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NonBlockingSink, NullSink, TelemetrySink};

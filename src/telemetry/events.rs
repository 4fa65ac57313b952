use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the limiters.
///
/// Every strategy and the dispatcher can report what it decided or changed. Events are
/// delivered best effort to a [`TelemetrySink`](super::TelemetrySink) after the caller
/// already has its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// Admission decisions
    Admission(AdmissionEvent),
    /// Shared-store failures (the request was denied)
    Backend(BackendEvent),
    /// Janitor sweeps over in-process buckets
    Janitor(JanitorEvent),
    /// Tier override changes in the dispatcher
    Tier(TierEvent),
}

/// A single admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request was admitted.
    Admitted {
        /// Rate-limit key
        key: String,
        /// Count in the current window including this request
        count: u64,
        /// Limit of the tier that decided
        limit: u64,
    },
    /// The quota for the current window is exhausted.
    Denied {
        /// Rate-limit key
        key: String,
        /// Limit of the tier that decided
        limit: u64,
    },
}

/// The shared store could not be used; the request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The store returned an error.
    Unavailable { key: String, error: String },
    /// The store did not answer within the configured timeout.
    TimedOut { key: String, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorEvent {
    /// A sweep finished.
    Swept {
        /// Buckets evicted by this sweep
        evicted: usize,
        /// Buckets still tracked afterwards
        remaining: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierEvent {
    /// An override was installed for `key`; `replaced` is true if one already existed.
    Installed { key: String, replaced: bool },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admission(e) => write!(f, "{}", e),
            LimiterEvent::Backend(e) => write!(f, "{}", e),
            LimiterEvent::Janitor(e) => write!(f, "{}", e),
            LimiterEvent::Tier(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { key, count, limit } => {
                write!(f, "Admitted(key={}, count={}/{})", key, count, limit)
            }
            AdmissionEvent::Denied { key, limit } => write!(f, "Denied(key={}, limit={})", key, limit),
        }
    }
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendEvent::Unavailable { key, error } => {
                write!(f, "BackendUnavailable(key={}, error={})", key, error)
            }
            BackendEvent::TimedOut { key, timeout } => {
                write!(f, "BackendTimedOut(key={}, timeout={:?})", key, timeout)
            }
        }
    }
}

impl fmt::Display for JanitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JanitorEvent::Swept { evicted, remaining } => {
                write!(f, "JanitorSwept(evicted={}, remaining={})", evicted, remaining)
            }
        }
    }
}

impl fmt::Display for TierEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierEvent::Installed { key, replaced } => {
                write!(f, "TierInstalled(key={}, replaced={})", key, replaced)
            }
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a LimiterEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    match event {
        LimiterEvent::Admission(a) => match a {
            AdmissionEvent::Admitted { key, count, limit } => json!({
                "kind": "admitted",
                "key": key,
                "count": *count,
                "limit": *limit,
            }),
            AdmissionEvent::Denied { key, limit } => {
                json!({ "kind": "denied", "key": key, "limit": *limit })
            }
        },
        LimiterEvent::Backend(b) => match b {
            BackendEvent::Unavailable { key, error } => {
                json!({ "kind": "backend_unavailable", "key": key, "error": error })
            }
            BackendEvent::TimedOut { key, timeout } => json!({
                "kind": "backend_timed_out",
                "key": key,
                "timeout_ms": clamp_u64(timeout.as_millis()),
            }),
        },
        LimiterEvent::Janitor(JanitorEvent::Swept { evicted, remaining }) => {
            json!({ "kind": "janitor_swept", "evicted": *evicted, "remaining": *remaining })
        }
        LimiterEvent::Tier(TierEvent::Installed { key, replaced }) => {
            json!({ "kind": "tier_installed", "key": key, "replaced": *replaced })
        }
    }
}

//! Error types for tier configuration and limiter plumbing.
//!
//! Quota exhaustion is not an error: `Strategy::allow` answers `false`. The types here
//! cover malformed tiers, which are rejected before they are ever installed, and failures
//! on the configuration and monitoring paths, which surface to the caller.
use std::time::Duration;

use thiserror::Error;

/// A tier that the engine refuses to operate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TierError {
    /// Limit must be > 0.
    #[error("limit must be > 0 (got {provided})")]
    InvalidLimit {
        /// Value provided by caller.
        provided: u64,
    },
    /// Window must be at least one millisecond.
    #[error("window must be at least 1ms (got {0:?})")]
    InvalidWindow(Duration),
}

/// Failures surfaced by configuration and monitoring calls.
///
/// `allow` and `reset` never return these; they fold them into a denial or a logged no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The owning task has stopped (runtime shutting down) and can no longer take requests.
    #[error("limiter owner task is unavailable")]
    OwnerUnavailable,
    /// The shared counter store reported an error.
    #[error("counter store error: {0}")]
    Store(String),
    /// The shared counter store did not answer in time.
    #[error("counter store did not answer within {timeout:?}")]
    StoreTimeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// A tier handed to the limiter failed validation.
    #[error("invalid tier: {0}")]
    InvalidTier(#[from] TierError),
}

impl LimiterError {
    /// Check if this error came from the shared store (failure or timeout).
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreTimeout { .. })
    }

    /// Check if this error is a store timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StoreTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_error_display() {
        assert_eq!(TierError::InvalidLimit { provided: 0 }.to_string(), "limit must be > 0 (got 0)");
        let msg = TierError::InvalidWindow(Duration::from_micros(10)).to_string();
        assert!(msg.contains("at least 1ms"), "{msg}");
    }

    #[test]
    fn limiter_error_from_tier_error() {
        let err: LimiterError = TierError::InvalidLimit { provided: 0 }.into();
        assert_eq!(err, LimiterError::InvalidTier(TierError::InvalidLimit { provided: 0 }));
        assert!(err.to_string().starts_with("invalid tier:"));
        assert!(!err.is_backend());
    }

    #[test]
    fn backend_predicates() {
        let timeout = LimiterError::StoreTimeout { timeout: Duration::from_millis(5) };
        assert!(timeout.is_backend());
        assert!(timeout.is_timeout());
        let store = LimiterError::Store("connection refused".into());
        assert!(store.is_backend());
        assert!(!store.is_timeout());
        assert!(!LimiterError::OwnerUnavailable.is_backend());
    }
}

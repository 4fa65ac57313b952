use std::fmt;
use std::time::Duration;

use crate::clock::duration_millis;
use crate::error::TierError;

/// A validated quota profile: at most `limit` admissions per `window`.
///
/// The only way to build one is [`TierConfig::new`] (or the helpers that call it), so a
/// zero limit or a sub-millisecond window never reaches a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TierConfig {
    limit: u64,
    window: Duration,
}

impl TierConfig {
    /// Create a tier with validation.
    ///
    /// # Errors
    /// Returns [`TierError::InvalidLimit`] if `limit == 0` and [`TierError::InvalidWindow`]
    /// if `window` is shorter than one millisecond.
    pub fn new(limit: u64, window: Duration) -> Result<Self, TierError> {
        if limit == 0 {
            return Err(TierError::InvalidLimit { provided: limit });
        }
        if window < Duration::from_millis(1) {
            return Err(TierError::InvalidWindow(window));
        }
        Ok(Self { limit, window })
    }

    /// `limit` requests per second.
    pub fn per_second(limit: u64) -> Result<Self, TierError> {
        Self::new(limit, Duration::from_secs(1))
    }

    /// `limit` requests per minute.
    pub fn per_minute(limit: u64) -> Result<Self, TierError> {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn window_millis(&self) -> u64 {
        duration_millis(self.window)
    }

    /// Idle time after which the janitor evicts a bucket: two full windows.
    pub(crate) fn idle_cutoff_millis(&self) -> u64 {
        self.window_millis().saturating_mul(2)
    }
}

impl fmt::Display for TierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {:?}", self.limit, self.window)
    }
}

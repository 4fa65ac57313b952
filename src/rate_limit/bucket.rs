//! Per-key fixed-window accounting. Plain data, no synchronization: the owning task of a
//! [`FixedWindow`](super::FixedWindow) is the only thing that ever touches a [`BucketStore`].

use std::collections::HashMap;

use super::TierConfig;

/// One key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Requests admitted so far in this window.
    pub count: u64,
    /// Clock reading (ms) at which this window began.
    pub window_start: u64,
}

impl Bucket {
    fn fresh(now: u64) -> Self {
        Self { count: 1, window_start: now }
    }

    /// Whether the window that began at `window_start` has fully elapsed at `now`.
    pub fn is_stale(&self, now: u64, window_millis: u64) -> bool {
        now.saturating_sub(self.window_start) >= window_millis
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; `count` is the bucket's count including this request.
    Admitted { count: u64 },
    /// Quota exhausted; the bucket was left untouched at `count`.
    Denied { count: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Key → [`Bucket`] map with the fixed-window rules applied on access.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: HashMap<String, Bucket>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit one request for `key` at clock reading `now`.
    ///
    /// A missing or stale bucket starts a fresh window with `count = 1`. Otherwise the count
    /// is incremented while it is below the limit, and the request is denied once it is not.
    pub fn admit(&mut self, key: &str, now: u64, tier: &TierConfig) -> Admission {
        let window = tier.window_millis();
        match self.buckets.get_mut(key) {
            None => {
                self.buckets.insert(key.to_owned(), Bucket::fresh(now));
                Admission::Admitted { count: 1 }
            }
            Some(bucket) if bucket.is_stale(now, window) => {
                *bucket = Bucket::fresh(now);
                Admission::Admitted { count: 1 }
            }
            Some(bucket) if bucket.count < tier.limit() => {
                bucket.count += 1;
                Admission::Admitted { count: bucket.count }
            }
            Some(bucket) => Admission::Denied { count: bucket.count },
        }
    }

    /// Undo one admission for `key`, dropping the bucket when nothing is left in it.
    pub fn release(&mut self, key: &str) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.count = bucket.count.saturating_sub(1);
            if bucket.count == 0 {
                self.buckets.remove(key);
            }
        }
    }

    /// Forget `key`. Returns whether a bucket was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Drop every bucket whose window began at least `max_idle` ms before `now`.
    /// Returns the number evicted.
    pub fn sweep(&mut self, now: u64, max_idle: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, b| now.saturating_sub(b.window_start) < max_idle);
        before - self.buckets.len()
    }

    pub fn get(&self, key: &str) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

//! Convenient re-exports for common ratewarden types.
pub use crate::{
    clock::{Clock, ManualClock, MonotonicClock},
    error::{LimiterError, TierError},
    rate_limit::{
        AdmissionLayer, ApiKeyExtractor, CounterStore, DistributedFixedWindow, FixedWindow,
        InMemoryCounterStore, IpKeyExtractor, KeyExtractor, PeerAddr, RateLimiter, Strategy,
        TierConfig,
    },
    telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};

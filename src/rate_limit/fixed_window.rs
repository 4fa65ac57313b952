//! In-process fixed-window strategy.
//!
//! A [`FixedWindow`] is a cheap, cloneable handle to an owner task. The owner holds the
//! [`BucketStore`] exclusively and processes `allow`, `reset` and janitor sweeps one at a
//! time in queue order, so no lock guards the map.
//!
//! The janitor ticks once per window and evicts buckets whose window began at least two
//! windows ago. It runs inside the owner's loop and is serialized with regular traffic.
//!
//! ```rust
//! use ratewarden::rate_limit::{FixedWindow, Strategy, TierConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = FixedWindow::new(TierConfig::new(2, Duration::from_secs(1)).unwrap());
//! assert!(limiter.allow("client").await);
//! assert!(limiter.allow("client").await);
//! assert!(!limiter.allow("client").await);
//! limiter.reset("client").await;
//! assert!(limiter.allow("client").await);
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::{Admission, BucketStore, Strategy, TierConfig};
use crate::clock::{Clock, MonotonicClock};
use crate::error::LimiterError;
use crate::telemetry::{AdmissionEvent, JanitorEvent, LimiterEvent, NonBlockingSink, NullSink};

/// Default bound on operations queued for the owner task. Submissions past it wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Allow { key: String, reply: oneshot::Sender<bool> },
    Reset { key: String, reply: oneshot::Sender<()> },
    Sweep { reply: oneshot::Sender<usize> },
    Len { reply: oneshot::Sender<usize> },
}

/// Handle to an in-process fixed-window limiter.
///
/// Clones share the same owner and buckets. The owner stops once every handle is dropped.
#[derive(Clone, Debug)]
pub struct FixedWindow {
    tx: mpsc::Sender<Command>,
    tier: TierConfig,
}

impl FixedWindow {
    /// Spawn a limiter with default settings. Must be called inside a tokio runtime.
    pub fn new(tier: TierConfig) -> Self {
        Self::builder(tier).spawn()
    }

    pub fn builder(tier: TierConfig) -> FixedWindowBuilder<NullSink> {
        FixedWindowBuilder {
            tier,
            clock: Arc::new(MonotonicClock::default()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            janitor: true,
            sink: NullSink,
        }
    }

    pub fn tier(&self) -> TierConfig {
        self.tier
    }

    /// Number of buckets the owner currently holds.
    pub async fn tracked_keys(&self) -> Result<usize, LimiterError> {
        self.submit(|reply| Command::Len { reply }).await
    }

    /// Run a janitor pass now. Returns the number of evicted buckets.
    pub async fn sweep(&self) -> Result<usize, LimiterError> {
        self.submit(|reply| Command::Sweep { reply }).await
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

#[async_trait]
impl Strategy for FixedWindow {
    async fn allow(&self, key: &str) -> bool {
        match self.submit(|reply| Command::Allow { key: key.to_owned(), reply }).await {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(target: "ratewarden::fixed_window", key, error = %e, "denying request");
                false
            }
        }
    }

    async fn reset(&self, key: &str) {
        if let Err(e) = self.submit(|reply| Command::Reset { key: key.to_owned(), reply }).await {
            tracing::warn!(target: "ratewarden::fixed_window", key, error = %e, "reset dropped");
        }
    }
}

/// Builder for [`FixedWindow`].
pub struct FixedWindowBuilder<S> {
    tier: TierConfig,
    clock: Arc<dyn Clock>,
    queue_capacity: usize,
    janitor: bool,
    sink: S,
}

impl<S> FixedWindowBuilder<S> {
    /// Use a custom clock for window arithmetic.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Bound on queued operations (minimum 1).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable or disable the periodic janitor. [`FixedWindow::sweep`] works either way.
    pub fn janitor(mut self, enabled: bool) -> Self {
        self.janitor = enabled;
        self
    }

    /// Report decisions and sweeps to `sink`. Events reach it through a bounded queue and
    /// a worker task, so a slow sink never holds up the owner; overflow is dropped.
    pub fn sink<T>(self, sink: T) -> FixedWindowBuilder<T> {
        FixedWindowBuilder {
            tier: self.tier,
            clock: self.clock,
            queue_capacity: self.queue_capacity,
            janitor: self.janitor,
            sink,
        }
    }

    /// Spawn the owner task and return a handle. Must be called inside a tokio runtime.
    pub fn spawn(self) -> FixedWindow
    where
        S: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let owner = Owner {
            rx,
            buckets: BucketStore::new(),
            tier: self.tier,
            clock: self.clock,
            janitor: self.janitor,
            sink: NonBlockingSink::with_capacity(self.sink, self.queue_capacity),
        };
        tokio::spawn(owner.run());
        FixedWindow { tx, tier: self.tier }
    }
}

struct Owner {
    rx: mpsc::Receiver<Command>,
    buckets: BucketStore,
    tier: TierConfig,
    clock: Arc<dyn Clock>,
    janitor: bool,
    sink: NonBlockingSink,
}

impl Owner {
    async fn run(mut self) {
        let period = self.tier.window();
        // A window too large to schedule can never go idle for two windows either.
        let first_tick = Instant::now().checked_add(period);
        let janitor = self.janitor && first_tick.is_some();
        let mut ticker = tokio::time::interval_at(first_tick.unwrap_or_else(Instant::now), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = ticker.tick(), if janitor => {
                    self.sweep();
                }
            }
        }
        tracing::debug!(target: "ratewarden::fixed_window", "owner stopped, all handles dropped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Allow { key, reply } => {
                // The caller gave up (deadline or disconnect) and was already told no.
                if reply.is_closed() {
                    tracing::debug!(target: "ratewarden::fixed_window", key = %key, "caller gone, not counted");
                    return;
                }
                let now = self.clock.now_millis();
                let admission = self.buckets.admit(&key, now, &self.tier);
                if reply.send(admission.is_admitted()).is_err() && admission.is_admitted() {
                    // Lost between the check and the reply; give the slot back.
                    self.buckets.release(&key);
                    return;
                }
                self.report(key, admission);
            }
            Command::Reset { key, reply } => {
                self.buckets.remove(&key);
                let _ = reply.send(());
            }
            Command::Sweep { reply } => {
                let evicted = self.sweep();
                let _ = reply.send(evicted);
            }
            Command::Len { reply } => {
                let _ = reply.send(self.buckets.len());
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let now = self.clock.now_millis();
        let evicted = self.buckets.sweep(now, self.tier.idle_cutoff_millis());
        let remaining = self.buckets.len();
        if evicted > 0 {
            tracing::debug!(target: "ratewarden::fixed_window", evicted, remaining, "janitor evicted idle buckets");
        }
        self.sink.try_emit(LimiterEvent::Janitor(JanitorEvent::Swept { evicted, remaining }));
        evicted
    }

    fn report(&self, key: String, admission: Admission) {
        let limit = self.tier.limit();
        let event = match admission {
            Admission::Admitted { count } => AdmissionEvent::Admitted { key, count, limit },
            Admission::Denied { .. } => {
                tracing::debug!(target: "ratewarden::fixed_window", key = %key, limit, "quota exhausted");
                AdmissionEvent::Denied { key, limit }
            }
        };
        self.sink.try_emit(LimiterEvent::Admission(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::telemetry::MemorySink;
    use futures::FutureExt;
    use std::time::Duration;

    fn tier(limit: u64, window: Duration) -> TierConfig {
        TierConfig::new(limit, window).unwrap()
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let limiter = FixedWindow::new(tier(5, Duration::from_secs(1)));
        for i in 0..5 {
            assert!(limiter.allow("k").await, "call {} should be admitted", i + 1);
        }
        assert!(!limiter.allow("k").await);
    }

    #[tokio::test]
    async fn manual_clock_rolls_the_window() {
        let clock = ManualClock::new();
        let limiter = FixedWindow::builder(tier(1, Duration::from_millis(100)))
            .clock(clock.clone())
            .janitor(false)
            .spawn();
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);
        clock.advance(Duration::from_millis(99));
        assert!(!limiter.allow("k").await);
        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn sweep_uses_two_window_cutoff() {
        let clock = ManualClock::new();
        let limiter = FixedWindow::builder(tier(3, Duration::from_millis(100)))
            .clock(clock.clone())
            .janitor(false)
            .spawn();
        limiter.allow("a").await;
        clock.advance(Duration::from_millis(150));
        limiter.allow("b").await;
        assert_eq!(limiter.sweep().await.unwrap(), 0);
        clock.advance(Duration::from_millis(50));
        assert_eq!(limiter.sweep().await.unwrap(), 1);
        assert_eq!(limiter.tracked_keys().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_ticks_once_per_window() {
        let clock = ManualClock::new();
        let sink = MemorySink::new();
        let limiter = FixedWindow::builder(tier(3, Duration::from_secs(10)))
            .clock(clock.clone())
            .sink(sink.clone())
            .spawn();
        for i in 0..20 {
            limiter.allow(&format!("one-shot-{i}")).await;
        }
        assert_eq!(limiter.tracked_keys().await.unwrap(), 20);

        clock.advance(Duration::from_secs(20));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(limiter.tracked_keys().await.unwrap(), 0);
        assert!(sink.wait_for(21, Duration::from_secs(1)).await);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            LimiterEvent::Janitor(JanitorEvent::Swept { evicted: 20, remaining: 0 })
        )));
    }

    #[tokio::test]
    async fn emits_admission_events() {
        let sink = MemorySink::new();
        let limiter = FixedWindow::builder(tier(1, Duration::from_secs(60))).sink(sink.clone()).spawn();
        limiter.allow("k").await;
        limiter.allow("k").await;
        assert!(sink.wait_for(2, Duration::from_secs(1)).await);
        assert_eq!(
            sink.events(),
            vec![
                LimiterEvent::Admission(AdmissionEvent::Admitted { key: "k".into(), count: 1, limit: 1 }),
                LimiterEvent::Admission(AdmissionEvent::Denied { key: "k".into(), limit: 1 }),
            ]
        );
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
    async fn stuck_sink_never_blocks_admission() {
        let limiter = FixedWindow::builder(tier(100, Duration::from_secs(60)))
            .queue_capacity(4)
            .sink(Stuck)
            .spawn();
        let all = tokio::time::timeout(Duration::from_secs(5), async {
            for _ in 0..50 {
                assert!(limiter.allow("k").await);
            }
            limiter.reset("k").await;
            limiter.tracked_keys().await.unwrap()
        });
        assert_eq!(all.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abandoned_call_does_not_consume_quota() {
        let limiter = FixedWindow::new(tier(1, Duration::from_secs(60)));
        // One poll queues the command; dropping the future abandons it before the owner runs.
        assert!(limiter.allow("k").now_or_never().is_none());
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);
    }

    #[tokio::test]
    async fn closed_reply_is_skipped_by_owner() {
        let limiter = FixedWindow::new(tier(1, Duration::from_secs(60)));
        let (reply, rx) = oneshot::channel();
        drop(rx);
        limiter.tx.send(Command::Allow { key: "k".into(), reply }).await.unwrap();
        assert_eq!(limiter.tracked_keys().await.unwrap(), 0);
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn queue_capacity_is_clamped() {
        let limiter = FixedWindow::builder(tier(1, Duration::from_secs(1))).queue_capacity(0).spawn();
        assert!(limiter.allow("k").await);
    }

    #[test]
    fn fails_closed_once_owner_is_gone() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let limiter = rt.block_on(async { FixedWindow::new(tier(10, Duration::from_secs(1))) });
        drop(rt);

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            assert!(!limiter.allow("k").await);
            limiter.reset("k").await;
            assert_eq!(limiter.tracked_keys().await, Err(LimiterError::OwnerUnavailable));
        });
    }
}

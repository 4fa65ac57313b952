#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use ratewarden::rate_limit::{FixedWindow, Strategy, TierConfig};
    use ratewarden::ManualClock;
    use std::time::Duration;

    fn tier(limit: u64, window: Duration) -> TierConfig {
        TierConfig::new(limit, window).expect("valid tier")
    }

    #[tokio::test]
    async fn first_limit_calls_admitted_then_denied() {
        let limiter = FixedWindow::new(tier(5, Duration::from_secs(1)));
        for call in 1..=5 {
            assert!(limiter.allow("client").await, "call {call} should be admitted");
        }
        assert!(!limiter.allow("client").await, "call 6 should be denied");
    }

    #[tokio::test]
    async fn window_rolls_over_after_sleep() {
        let limiter = FixedWindow::new(tier(2, Duration::from_millis(100)));
        assert!(limiter.allow("client").await);
        assert!(limiter.allow("client").await);
        assert!(!limiter.allow("client").await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow("client").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = FixedWindow::new(tier(2, Duration::from_secs(60)));
        assert!(limiter.allow("a").await);
        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);

        assert!(limiter.allow("b").await);
        assert!(limiter.allow("b").await);
    }

    #[tokio::test]
    async fn reset_unknown_key_is_noop_and_reset_restores_quota() {
        let limiter = FixedWindow::new(tier(1, Duration::from_secs(60)));
        limiter.reset("nobody").await;
        assert_eq!(limiter.tracked_keys().await.unwrap(), 0);

        assert!(limiter.allow("client").await);
        assert!(!limiter.allow("client").await);
        limiter.reset("client").await;
        limiter.reset("client").await;
        assert!(limiter.allow("client").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_admit_exactly_limit() {
        let limiter = FixedWindow::new(tier(100, Duration::from_secs(60)));
        let calls = (0..150).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("shared").await })
        });
        let admitted = join_all(calls)
            .await
            .into_iter()
            .map(|r| r.expect("task panicked"))
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 100);
    }

    #[tokio::test]
    async fn one_shot_keys_do_not_accumulate() {
        let clock = ManualClock::new();
        let window = Duration::from_millis(100);
        let limiter = FixedWindow::builder(tier(1, window)).clock(clock.clone()).janitor(false).spawn();

        for round in 0..10 {
            for i in 0..50 {
                assert!(limiter.allow(&format!("round-{round}-key-{i}")).await);
            }
            clock.advance(window);
            limiter.sweep().await.unwrap();
        }
        // Only the two most recent rounds can still be inside the two-window margin.
        assert!(limiter.tracked_keys().await.unwrap() <= 100);
    }

    #[tokio::test]
    async fn clones_share_buckets() {
        let limiter = FixedWindow::new(tier(1, Duration::from_secs(60)));
        let other = limiter.clone();
        assert!(limiter.allow("client").await);
        assert!(!other.allow("client").await);
        assert_eq!(other.tier(), limiter.tier());
    }
}

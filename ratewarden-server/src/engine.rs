//! Builds the admission engine described by a [`ServerConfig`].

use std::collections::HashMap;
use std::sync::Arc;

use ratewarden::rate_limit::{DistributedFixedWindow, FixedWindow, RateLimiter, Strategy};
use ratewarden::telemetry::LogSink;
use ratewarden::{LimiterError, TierConfig};
use ratewarden_redis::RedisCounterStore;
use thiserror::Error;

use crate::config::{ConfigError, ServerConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("redis unavailable: {0}")]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

/// Which tier each key belongs to, for presentation in responses.
#[derive(Debug, Clone)]
pub struct TierDirectory {
    default: TierConfig,
    premium: HashMap<String, TierConfig>,
}

impl TierDirectory {
    /// `("premium", tier)` for a configured key, `("basic", default)` otherwise.
    pub fn classify(&self, api_key: Option<&str>) -> (&'static str, TierConfig) {
        match api_key.and_then(|k| self.premium.get(k)) {
            Some(tier) => ("premium", *tier),
            None => ("basic", self.default),
        }
    }
}

/// Human form of a tier, e.g. `100 requests/minute`.
pub fn describe(tier: TierConfig) -> String {
    let unit = match tier.window().as_millis() {
        1_000 => "second".to_owned(),
        60_000 => "minute".to_owned(),
        3_600_000 => "hour".to_owned(),
        _ => format!("{:?}", tier.window()),
    };
    format!("{} requests/{}", tier.limit(), unit)
}

pub struct Engine {
    pub limiter: RateLimiter,
    pub tiers: Arc<TierDirectory>,
    /// `"redis"` or `"in-process"`.
    pub backend: &'static str,
}

/// Build the dispatcher and install the configured premium clients.
///
/// With a Redis URL the quota is shared through Redis and Redis must answer a PING,
/// otherwise buckets live in this process.
pub async fn build_engine(config: &ServerConfig) -> Result<Engine, EngineError> {
    config.validate()?;
    let default = config.default_tier.to_tier("default_tier")?;
    let queue = config.queue_capacity;

    let (limiter, backend) = match &config.redis_url {
        Some(url) => {
            let store = RedisCounterStore::connect(url).await?;
            store.ping().await?;
            tracing::info!(target: "ratewarden::server", "connected to redis");
            let shared = DistributedFixedWindow::new(store, default)
                .with_store_timeout(config.store_timeout())
                .with_sink(LogSink);
            let base = shared.clone();
            let limiter = RateLimiter::builder(shared)
                .queue_capacity(queue)
                .tier_factory(move |tier| Arc::new(base.with_tier(tier)) as Arc<dyn Strategy>)
                .sink(LogSink)
                .spawn();
            (limiter, "redis")
        }
        None => {
            let window = FixedWindow::builder(default).queue_capacity(queue).sink(LogSink).spawn();
            let limiter = RateLimiter::builder(window)
                .queue_capacity(queue)
                .tier_factory(move |tier| {
                    Arc::new(FixedWindow::builder(tier).queue_capacity(queue).sink(LogSink).spawn())
                        as Arc<dyn Strategy>
                })
                .sink(LogSink)
                .spawn();
            (limiter, "in-process")
        }
    };

    let mut premium = HashMap::new();
    for client in &config.premium_clients {
        let tier = client.tier_spec().to_tier(&client.api_key)?;
        limiter.set_premium_tier(client.api_key.clone(), tier).await?;
        premium.insert(client.api_key.clone(), tier);
    }
    tracing::info!(
        target: "ratewarden::server",
        backend,
        default = %describe(default),
        premium_clients = premium.len(),
        "admission engine ready"
    );

    Ok(Engine { limiter, tiers: Arc::new(TierDirectory { default, premium }), backend })
}

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use ratewarden::{TierConfig, TierError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key the stock deployment treats as premium.
pub const DEFAULT_PREMIUM_KEY: &str = "premium-api-key";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid tier for {scope}: {source}")]
    InvalidTier {
        scope: String,
        #[source]
        source: TierError,
    },
    #[error("premium client api_key must not be empty")]
    EmptyApiKey,
}

/// A quota as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub limit: u64,
    pub window_ms: u64,
}

impl TierSpec {
    pub fn per_minute(limit: u64) -> Self {
        Self { limit, window_ms: 60_000 }
    }

    /// Validate into an engine tier; `scope` names the entry in errors.
    pub fn to_tier(&self, scope: &str) -> Result<TierConfig, ConfigError> {
        TierConfig::new(self.limit, Duration::from_millis(self.window_ms))
            .map_err(|source| ConfigError::InvalidTier { scope: scope.to_owned(), source })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumClient {
    pub api_key: String,
    pub limit: u64,
    pub window_ms: u64,
}

impl PremiumClient {
    pub fn tier_spec(&self) -> TierSpec {
        TierSpec { limit: self.limit, window_ms: self.window_ms }
    }
}

/// Server configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub default_tier: TierSpec,
    pub premium_clients: Vec<PremiumClient>,
    /// Shared Redis quota when set, in-process buckets otherwise.
    pub redis_url: Option<String>,
    pub store_timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            default_tier: TierSpec::per_minute(10),
            premium_clients: vec![PremiumClient {
                api_key: DEFAULT_PREMIUM_KEY.to_owned(),
                limit: 100,
                window_ms: 60_000,
            }],
            redis_url: None,
            store_timeout_ms: 250,
            queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Parse a JSON config file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        Self::from_json(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.to_owned(), source },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|source| ConfigError::Parse { path: PathBuf::from("<inline>"), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject any tier the engine would refuse, before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_tier.to_tier("default_tier")?;
        for client in &self.premium_clients {
            if client.api_key.trim().is_empty() {
                return Err(ConfigError::EmptyApiKey);
            }
            client.tier_spec().to_tier(&client.api_key)?;
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Command-line flags; each falls back to an environment variable.
#[derive(Debug, Parser)]
#[command(name = "ratewarden-server", version, about = "Rate-limited demo API")]
pub struct Cli {
    /// JSON config file
    #[arg(long, env = "RATEWARDEN_CONFIG")]
    pub config: Option<PathBuf>,
    /// Address to bind, overrides the file
    #[arg(long, env = "RATEWARDEN_LISTEN")]
    pub listen: Option<SocketAddr>,
    /// Redis URL for a shared quota, overrides the file
    #[arg(long, env = "RATEWARDEN_REDIS_URL")]
    pub redis_url: Option<String>,
}

impl Cli {
    /// Load the file (or defaults) and apply flag overrides.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.redis_url.is_some() {
            config.redis_url = self.redis_url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_stock_deployment() {
        let config = ServerConfig::from_json("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.default_tier, TierSpec { limit: 10, window_ms: 60_000 });
        assert_eq!(config.premium_clients[0].api_key, DEFAULT_PREMIUM_KEY);
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn overrides_fields() {
        let config = ServerConfig::from_json(
            r#"{
                "listen": "127.0.0.1:9000",
                "default_tier": { "limit": 5, "window_ms": 1000 },
                "premium_clients": [{ "api_key": "gold", "limit": 50, "window_ms": 1000 }],
                "redis_url": "redis://127.0.0.1:6379"
            }"#,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.premium_clients.len(), 1);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_zero_limit_and_window() {
        let err = ServerConfig::from_json(r#"{ "default_tier": { "limit": 0, "window_ms": 1000 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTier { ref scope, .. } if scope == "default_tier"));

        let err = ServerConfig::from_json(
            r#"{ "premium_clients": [{ "api_key": "gold", "limit": 5, "window_ms": 0 }] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("gold"), "{err}");
    }

    #[test]
    fn rejects_blank_premium_key() {
        let err = ServerConfig::from_json(
            r#"{ "premium_clients": [{ "api_key": " ", "limit": 5, "window_ms": 1000 }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyApiKey));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(ServerConfig::from_json("{"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "ratewarden-server",
            "--listen",
            "127.0.0.1:7000",
            "--redis-url",
            "redis://cache:6379",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ServerConfig::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

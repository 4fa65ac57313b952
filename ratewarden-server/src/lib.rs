//! Process wiring for `ratewarden`: configuration loading, engine construction and the
//! HTTP routes. `main.rs` only parses flags, installs logging and serves.

pub mod config;
pub mod engine;
pub mod routes;

pub use config::{Cli, ConfigError, PremiumClient, ServerConfig, TierSpec};
pub use engine::{build_engine, Engine, EngineError, TierDirectory};
pub use routes::{router, AppState};

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use ratewarden_server::{build_engine, router, AppState, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Cli::parse().into_config().context("loading configuration")?;
    let engine = build_engine(&config).await.context("building admission engine")?;
    let app = router(AppState::from(engine));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(target: "ratewarden::server", listen = %config.listen, "server starting");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "ratewarden::server", "shutting down");
        })
        .await
        .context("serving http")?;
    Ok(())
}

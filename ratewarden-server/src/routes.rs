use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ratewarden::rate_limit::{AdmissionLayer, ApiKeyExtractor, KeyExtractor, PeerAddr, RateLimiter};
use serde::{Deserialize, Serialize};

use crate::engine::{describe, Engine, TierDirectory};

#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
    pub tiers: Arc<TierDirectory>,
}

impl From<Engine> for AppState {
    fn from(engine: Engine) -> Self {
        Self { limiter: engine.limiter, tiers: engine.tiers }
    }
}

/// `/api/*` sits behind admission control; `/admin/*` and `/healthz` do not.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/hello", get(hello))
        .route_layer(AdmissionLayer::new(state.limiter.clone()));

    Router::new()
        .merge(api)
        .route("/admin/reset", get(reset).post(reset))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(tag_peer_addr))
        .with_state(state)
}

/// Copy the connected peer into the extension the key extractor reads.
async fn tag_peer_addr(mut req: Request, next: Next) -> Response {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied() {
        req.extensions_mut().insert(PeerAddr(addr));
    }
    next.run(req).await
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HelloResponse {
    pub message: String,
    pub time: String,
    pub user_tier: String,
    pub rate_limit: String,
}

/// The tier shown is looked up by the same key the admission layer limited on.
async fn hello(State(state): State<AppState>, req: Request) -> impl IntoResponse {
    let key = ApiKeyExtractor.extract(&req);
    let (tier_name, tier) = state.tiers.classify(Some(&key));
    let body = HelloResponse {
        message: "Hello! You are within rate limits.".to_owned(),
        time: chrono::Utc::now().to_rfc3339(),
        user_tier: tier_name.to_owned(),
        rate_limit: describe(tier),
    };
    ([("x-user-tier", tier_name)], Json(body))
}

#[derive(Debug, Deserialize)]
struct ResetParams {
    api_key: String,
}

async fn reset(State(state): State<AppState>, Query(params): Query<ResetParams>) -> String {
    state.limiter.reset(&params.api_key).await;
    tracing::info!(target: "ratewarden::server", key = %params.api_key, "rate limit reset");
    format!("Rate limit reset for: {}", params.api_key)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

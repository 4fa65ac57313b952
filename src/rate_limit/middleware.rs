//! Tower middleware that puts a [`RateLimiter`] in front of an HTTP service.
//!
//! Each request is mapped to a rate-limit key by a [`KeyExtractor`]. Admitted requests are
//! forwarded unmodified. Denied requests never reach the inner service and are answered
//! with `429 Too Many Requests`, an `x-ratelimit-exceeded: true` header and a plain-text
//! body, so clients can tell admission control apart from other failures.

use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use tower_layer::Layer;
use tower_service::Service;

use super::RateLimiter;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Proxy-supplied client address chain; the first entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Marker set on every rejection issued by this middleware.
pub const RATE_LIMIT_EXCEEDED_HEADER: &str = "x-ratelimit-exceeded";
/// Key used when a request carries no identity at all.
pub const UNKNOWN_CLIENT_KEY: &str = "unknown";

/// Connected peer address, inserted into request extensions by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Maps a request to the key its quota is tracked under.
pub trait KeyExtractor: Clone + Send + Sync + 'static {
    fn extract<B>(&self, req: &Request<B>) -> String;
}

/// Network identity: first `x-forwarded-for` entry, else the peer IP (port dropped), else
/// [`UNKNOWN_CLIENT_KEY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IpKeyExtractor;

impl KeyExtractor for IpKeyExtractor {
    fn extract<B>(&self, req: &Request<B>) -> String {
        let forwarded = req
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            return client.to_owned();
        }
        match req.extensions().get::<PeerAddr>() {
            Some(PeerAddr(addr)) => addr.ip().to_string(),
            None => UNKNOWN_CLIENT_KEY.to_owned(),
        }
    }
}

/// `x-api-key` when present and non-empty, else [`IpKeyExtractor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyExtractor;

impl KeyExtractor for ApiKeyExtractor {
    fn extract<B>(&self, req: &Request<B>) -> String {
        req.headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| IpKeyExtractor.extract(req))
    }
}

/// A layer that enforces admission control using a [`RateLimiter`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer<K = ApiKeyExtractor> {
    limiter: RateLimiter,
    extractor: K,
    deadline: Option<Duration>,
}

impl AdmissionLayer {
    /// Layer keyed by [`ApiKeyExtractor`].
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter, extractor: ApiKeyExtractor, deadline: None }
    }
}

impl<K> AdmissionLayer<K> {
    /// Use a different key policy.
    pub fn with_extractor<K2: KeyExtractor>(self, extractor: K2) -> AdmissionLayer<K2> {
        AdmissionLayer { limiter: self.limiter, extractor, deadline: self.deadline }
    }

    /// Deny requests whose admission check takes longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl<S, K: Clone> Layer<S> for AdmissionLayer<K> {
    type Service = AdmissionService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
            deadline: self.deadline,
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S, K = ApiKeyExtractor> {
    inner: S,
    limiter: RateLimiter,
    extractor: K,
    deadline: Option<Duration>,
}

impl<S, K, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: KeyExtractor,
    ReqBody: Send + 'static,
    ResBody: From<&'static str> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = self.extractor.extract(&req);
        let limiter = self.limiter.clone();
        let deadline = self.deadline;
        // Keep the instance that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let admitted = match deadline {
                Some(deadline) => limiter.allow_within(&key, deadline).await,
                None => limiter.allow(&key).await,
            };
            if !admitted {
                tracing::info!(
                    target: "ratewarden::middleware",
                    key = %key,
                    method = %req.method(),
                    path = req.uri().path(),
                    "rate limit exceeded"
                );
                return Ok(too_many_requests());
            }
            tracing::debug!(
                target: "ratewarden::middleware",
                key = %key,
                method = %req.method(),
                path = req.uri().path(),
                "request admitted"
            );
            inner.call(req).await
        })
    }
}

fn too_many_requests<B: From<&'static str>>() -> Response<B> {
    let mut response = Response::new(B::from("Rate limit exceeded"));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_EXCEEDED_HEADER, HeaderValue::from_static("true"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

//! Per-route fixed-window rate limiting.
//!
//! Counters are keyed by `{client_id}:{route}` and live in a [`RateLimitStore`].
//! The bundled [`InMemoryRateLimitStore`] is process-local: every instance of the
//! service keeps its own counters, so N replicas allow N times the configured
//! quota. Plug in a shared store to enforce limits across instances.
//!
//! The client id is a heuristic fingerprint (IP plus a hash of the User-Agent).
//! It is easy to spoof and only meant to slow down abuse of the public forms.
//! Forwarding headers are trusted only from an internal proxy, so they cannot
//! claim the private-network exemption.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::errors::AppError;

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Quota for one route.
#[derive(Debug, Clone)]
pub struct RouteLimit {
    pub window: Duration,
    pub max_requests: u32,
    /// Shown to the visitor when the quota is exhausted.
    pub message: String,
}

impl RouteLimit {
    pub fn new(window: Duration, max_requests: u32, message: impl Into<String>) -> Self {
        Self {
            window,
            max_requests,
            message: message.into(),
        }
    }
}

/// Quotas for the public write endpoints.
pub fn default_route_limits() -> HashMap<String, RouteLimit> {
    HashMap::from([
        (
            "/api/leads".to_string(),
            RouteLimit::new(
                Duration::from_secs(5 * 60),
                3,
                "리드 제출이 일시적으로 제한되었습니다. 5분 후 다시 시도해주세요.",
            ),
        ),
        (
            "/api/newsletter/subscribe".to_string(),
            RouteLimit::new(
                Duration::from_secs(10 * 60),
                2,
                "뉴스레터 구독 요청이 일시적으로 제한되었습니다. 10분 후 다시 시도해주세요.",
            ),
        ),
        (
            "/api/typebot/webhook".to_string(),
            RouteLimit::new(
                Duration::from_secs(60),
                20,
                "Typebot 웹훅 요청이 일시적으로 제한되었습니다.",
            ),
        ),
        (
            "/api/consultation/summary".to_string(),
            RouteLimit::new(
                Duration::from_secs(60),
                5,
                "상담 요약 요청이 일시적으로 제한되었습니다. 1분 후 다시 시도해주세요.",
            ),
        ),
    ])
}

/// Outcome of recording one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub allowed: bool,
    /// Requests counted in the current window, including this one when allowed.
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Counter storage. `hit` must apply the check-and-increment atomically per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, AppError>;

    /// Drop windows that ended before `now`. Returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Process-local store backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, AppError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| AppError::InternalError("rate limit store poisoned".to_string()))?;

        match windows.get_mut(key) {
            Some(current) if now <= current.reset_at => {
                if current.count >= max_requests {
                    return Ok(WindowHit {
                        allowed: false,
                        count: current.count,
                        reset_at: current.reset_at,
                    });
                }
                current.count += 1;
                Ok(WindowHit {
                    allowed: true,
                    count: current.count,
                    reset_at: current.reset_at,
                })
            }
            _ => {
                let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
                let fresh = Window {
                    count: 1,
                    reset_at: now + span,
                };
                windows.insert(key.to_string(), fresh);
                Ok(WindowHit {
                    allowed: true,
                    count: 1,
                    reset_at: fresh.reset_at,
                })
            }
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| AppError::InternalError("rate limit store poisoned".to_string()))?;
        let before = windows.len();
        windows.retain(|_, w| now <= w.reset_at);
        Ok(before - windows.len())
    }
}

/// Result of a rate-limit check. Quota fields are `None` for unconfigured routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after_secs: Option<u64>,
    pub message: Option<String>,
}

impl RateLimitDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: None,
            remaining: None,
            reset_at: None,
            retry_after_secs: None,
            message: None,
        }
    }
}

pub struct RateLimiter {
    routes: HashMap<String, RouteLimit>,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_routes(default_route_limits(), store)
    }

    pub fn with_routes(routes: HashMap<String, RouteLimit>, store: Arc<dyn RateLimitStore>) -> Self {
        Self { routes, store }
    }

    /// Limiter over a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()))
    }

    /// Configured route for `path`. Falls back to the parent path so that a
    /// trailing id segment (`/api/faqs/123`) resolves to its collection.
    pub fn route_for<'a>(&'a self, path: &'a str) -> Option<(&'a str, &'a RouteLimit)> {
        let path = path.trim_end_matches('/');
        if let Some((route, limit)) = self.routes.get_key_value(path) {
            return Some((route.as_str(), limit));
        }
        let (parent, _) = path.rsplit_once('/')?;
        self.routes
            .get_key_value(parent)
            .map(|(route, limit)| (route.as_str(), limit))
    }

    pub async fn check(&self, client_id: &str, path: &str) -> RateLimitDecision {
        self.check_at(client_id, path, Utc::now()).await
    }

    /// Record a request made at `now`.
    ///
    /// Store failures fail open: the request is allowed and the error logged.
    pub async fn check_at(&self, client_id: &str, path: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let Some((route, limit)) = self.route_for(path) else {
            return RateLimitDecision::unlimited();
        };

        let key = format!("{}:{}", client_id, route);
        let hit = match self
            .store
            .hit(&key, limit.window, limit.max_requests, now)
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                tracing::error!(route, "Rate limit store failed, allowing request: {}", e);
                return RateLimitDecision::unlimited();
            }
        };

        if hit.allowed {
            RateLimitDecision {
                allowed: true,
                limit: Some(limit.max_requests),
                remaining: Some(limit.max_requests.saturating_sub(hit.count)),
                reset_at: Some(hit.reset_at),
                retry_after_secs: None,
                message: None,
            }
        } else {
            let millis = (hit.reset_at - now).num_milliseconds().max(0) as u64;
            tracing::warn!(client_id, route, "Rate limit exceeded");
            RateLimitDecision {
                allowed: false,
                limit: Some(limit.max_requests),
                remaining: Some(0),
                reset_at: Some(hit.reset_at),
                retry_after_secs: Some(millis.div_ceil(1000)),
                message: Some(limit.message.clone()),
            }
        }
    }

    /// Periodically evict expired windows to bound memory.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.store.sweep_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Swept expired rate limit windows"),
                    Err(e) => tracing::warn!("Rate limit sweep failed: {}", e),
                }
            }
        })
    }
}

/// Where a request came from, as far as the limiter can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr {
    pub ip: String,
    /// Loopback or private-network origin, proven by the socket peer.
    pub exempt: bool,
}

impl ClientAddr {
    fn new(ip: impl Into<String>, exempt: bool) -> Self {
        Self {
            ip: ip.into(),
            exempt,
        }
    }
}

/// Forwarding hops, oldest first: `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_hops(headers: &HeaderMap) -> Vec<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|hop| !hop.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|hops| !hops.is_empty())
    };
    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .unwrap_or_default()
}

/// Resolve the client behind the socket `peer`.
///
/// A public peer is the client and its forwarding headers are ignored. Behind an
/// internal proxy the hops are read right to left and the first non-internal one is
/// the client; everything to its left was written by the client itself. Only an
/// internal peer can make a request exempt. Without a known peer the headers still
/// identify the client but never exempt it.
pub fn resolve_client(headers: &HeaderMap, peer: Option<IpAddr>) -> ClientAddr {
    if let Some(peer) = peer.filter(|ip| !is_internal(*ip)) {
        return ClientAddr::new(peer.to_string(), false);
    }

    let hops = forwarded_hops(headers);
    let external = hops.iter().rev().find(|hop| !is_internal_ip(hop));
    match (external, peer) {
        (Some(client), _) => ClientAddr::new(client.as_str(), false),
        // Every hop is internal
        (None, Some(peer)) => ClientAddr::new(
            hops.first().cloned().unwrap_or_else(|| peer.to_string()),
            true,
        ),
        (None, None) => ClientAddr::new(
            hops.first().cloned().unwrap_or_else(|| "unknown".to_string()),
            false,
        ),
    }
}

/// `{ip}:{hash(user agent)}`
pub fn client_id(ip: &str, user_agent: Option<&str>) -> String {
    format!("{}:{}", ip, fingerprint_hash(user_agent.unwrap_or("unknown")))
}

/// 32-bit multiplicative string hash (`h * 31 + c`), absolute value in base 36.
pub fn fingerprint_hash(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Loopback or private-network address.
pub fn is_internal_ip(ip: &str) -> bool {
    ip == "localhost" || ip.parse::<IpAddr>().is_ok_and(is_internal)
}

fn set_quota_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if let Some(limit) = decision.limit {
        headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
    }
    if let Some(remaining) = decision.remaining {
        headers.insert(HEADER_REMAINING, HeaderValue::from(remaining));
    }
    if let Some(reset_at) = decision.reset_at {
        headers.insert(HEADER_RESET, HeaderValue::from(reset_at.timestamp()));
    }
}

/// Axum middleware applying [`RateLimiter`] to every request it wraps.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let origin = resolve_client(request.headers(), peer);
    if origin.exempt {
        return next.run(request).await;
    }

    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let client = client_id(&origin.ip, user_agent);
    let path = request.uri().path().to_string();

    let decision = limiter.check(&client, &path).await;
    if !decision.allowed {
        let mut response = AppError::RateLimited {
            message: decision.message.clone().unwrap_or_default(),
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
        }
        .into_response();
        set_quota_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    set_quota_headers(response.headers_mut(), &decision);
    response
}

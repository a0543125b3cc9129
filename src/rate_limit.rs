//! Fixed-window request limiting for the `/api` routes

use crate::server::AppState;
use crate::server::auth::session_token;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    /// key (`user:<id>` or `ip:<addr>`) -> current window
    inner: Arc<Mutex<HashMap<String, Window>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Count one request against `key`. The first request after a window has
    /// expired opens a new window with count 1.
    pub async fn check(&self, key: &str) -> RateDecision {
        let mut map = self.inner.lock().await;
        let now = Instant::now();

        if let Some(window) = map.get_mut(key).filter(|w| now < w.reset_at) {
            let reset_in = window.reset_at.saturating_duration_since(now);
            if window.count >= self.max_requests {
                return RateDecision {
                    allowed: false,
                    limit: self.max_requests,
                    remaining: 0,
                    reset_in,
                };
            }
            window.count += 1;
            return RateDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests - window.count,
                reset_in,
            };
        }

        map.insert(
            key.to_owned(),
            Window {
                count: 1,
                reset_at: now + self.window,
            },
        );
        RateDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(1),
            reset_in: self.window,
        }
    }

    /// Drop windows that have already expired.
    pub async fn cleanup(&self) {
        let mut map = self.inner.lock().await;
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, window| window.reset_at > now);
        debug!(removed = before - map.len(), "Rate limiter cleanup");
    }
}

/// Client IP: first `X-Forwarded-For` entry, then the peer address.
fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first) = val.split(',').next()
    {
        let ip = first.trim();
        if !ip.is_empty() {
            return ip.to_owned();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// `user:<id>` when the session resolves, else `ip:<addr>`. Takes owned
/// values so no borrow of the request lives across the lock.
async fn limit_key(state: &AppState, token: Option<String>, ip: String) -> String {
    if let Some(token) = token {
        let db = state.db.lock().await;
        match db.user_for_session(&token) {
            Ok(Some(user)) => return format!("user:{}", user.id),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Session lookup failed during rate limiting"),
        }
    }
    format!("ip:{ip}")
}

fn reset_timestamp(reset_in: Duration) -> String {
    (OffsetDateTime::now_utc() + reset_in)
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn set_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&reset_timestamp(decision.reset_in)) {
        headers.insert("x-ratelimit-reset", reset);
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = session_token(request.headers());
    let ip = client_ip(&request);
    let key = limit_key(&state, token, ip).await;
    let decision = state.limiter.check(&key).await;

    if !decision.allowed {
        let retry_after = decision.reset_in.as_secs_f64().ceil() as u64;
        warn!(key = %key, retry_after, "Rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": "Rate limit exceeded", "retryAfter": retry_after })),
        )
            .into_response();
        set_headers(response.headers_mut(), &decision);
        return Err(response);
    }

    let mut response = next.run(request).await;
    set_headers(response.headers_mut(), &decision);
    Ok(response)
}

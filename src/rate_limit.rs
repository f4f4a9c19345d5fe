//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing on login and account spam on signup.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::auth::client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const SIGNUP_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login (1 per second, bursts of 5)
    pub login: Arc<IpLimiter>,
    /// Per-IP limiter for signup (3 per minute)
    pub signup: Arc<IpLimiter>,
    /// Take the client address from `X-Forwarded-For` (only behind a proxy)
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Create rate limiters with the production quotas.
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self::with_quotas(
            Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            Quota::per_minute(SIGNUP_PER_MIN),
            trust_forwarded_for,
        )
    }

    /// Create rate limiters with custom quotas (tests use very generous ones).
    pub fn with_quotas(login: Quota, signup: Quota, trust_forwarded_for: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(login)),
            signup: Arc::new(RateLimiter::keyed(signup)),
            trust_forwarded_for,
        }
    }
}

fn check(limiter: &IpLimiter, config: &RateLimitConfig, request: &Request) -> Result<(), Response> {
    let ip = client_ip(request, config.trust_forwarded_for).map_err(|reason| {
        warn!(reason, "Unable to determine client IP");
        (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response()
    })?;

    limiter.check_key(&ip).map_err(|_| {
        warn!(ip = %ip, "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        )
            .into_response()
    })
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(&config.login, &config, &request) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting signup.
pub async fn rate_limit_signup(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(&config.signup, &config, &request) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

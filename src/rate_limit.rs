//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password guessing.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::client_ip;

/// Per-IP rate limiter keyed by the textual client address.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Login attempts allowed back to back from one address.
pub const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Sustained login attempts per second from one address.
pub const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            )),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<RateLimitConfig>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.extensions());

    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, "Login rate limit exceeded");
            ApiError::too_many_requests("Too many login attempts. Please wait before trying again.")
                .into_response()
        }
    }
}

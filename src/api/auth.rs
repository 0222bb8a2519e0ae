//! Authentication API endpoints.
//!
//! - POST `/auth/login` - Exchange email/password for an access + refresh token pair
//! - POST `/auth/refresh` - Rotate a refresh token
//! - POST `/auth/logout` - Revoke a refresh token (always succeeds)
//! - POST `/auth/logout-all` - Revoke every refresh token of the caller
//! - GET `/auth/me` - Claims of the presented access token
//! - GET `/auth/sessions` - Refresh token records of the caller

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::{Auth, AuthService};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::rate_limit::{RateLimitConfig, rate_limit_login};

#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
    pub jwt: Arc<JwtConfig>,
    pub rate_limit_config: RateLimitConfig,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let login_router = Router::new()
        .route("/auth/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let session_router = Router::new()
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(me))
        .route("/auth/sessions", get(sessions))
        .with_state(state);

    Router::new().merge(login_router).merge(session_router)
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let session = state.service.login(email, &payload.password).await?;
    Ok(Json(session))
}

async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.service.refresh(&payload.refresh_token).await?;
    Ok(Json(session))
}

/// The body is parsed leniently: logout reports success even for a
/// malformed request so it never reveals whether a token was recognized.
async fn logout(State(state): State<AuthState>, body: Bytes) -> impl IntoResponse {
    if let Ok(payload) = serde_json::from_slice::<RefreshRequest>(&body) {
        state.service.logout(&payload.refresh_token).await;
    }
    Json(serde_json::json!({ "success": true }))
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: u64,
}

async fn logout_all(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.service.logout_all(auth.user_id()).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

#[derive(Serialize)]
struct MeResponse {
    user_id: String,
    email: String,
    role: String,
}

async fn me(Auth(auth): Auth) -> impl IntoResponse {
    Json(MeResponse {
        user_id: auth.claims.sub,
        email: auth.claims.email,
        role: auth.claims.role,
    })
}

#[derive(Serialize)]
struct SessionInfo {
    id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    active: bool,
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn sessions(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let sessions = state
        .service
        .sessions(auth.user_id())
        .await?
        .into_iter()
        .map(|r| SessionInfo {
            active: r.is_valid_at(now),
            id: r.id,
            created_at: r.created_at,
            expires_at: r.expires_at,
            revoked: r.revoked,
            revoked_at: r.revoked_at,
        })
        .collect();

    Ok(Json(SessionsResponse { sessions }))
}

mod auth;
mod error;
mod notifications;
mod reminders;
mod ws;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::auth::{AuthService, ReplayPolicy};
use crate::db::Database;
use crate::hub::{Hub, WsTimeouts};
use crate::jwt::JwtConfig;
use crate::notifier::Notifier;
use crate::rate_limit::RateLimitConfig;

pub use error::{ApiError, ResultExt};
pub use ws::FRAME_DELIMITER;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    hub: Hub,
    replay_policy: ReplayPolicy,
    ws_timeouts: WsTimeouts,
) -> Router {
    let auth_state = auth::AuthState {
        service: AuthService::new(db.clone(), jwt.clone(), replay_policy),
        jwt: jwt.clone(),
        rate_limit_config: RateLimitConfig::new(),
    };

    let notifications_state = notifications::NotificationsState {
        db: db.clone(),
        jwt: jwt.clone(),
        notifier: Notifier::new(db.clone(), hub.clone()),
    };

    let ws_state = ws::WsState {
        jwt: jwt.clone(),
        hub,
        timeouts: ws_timeouts,
    };

    let reminders_state = reminders::RemindersState { db, jwt };

    Router::new()
        .route("/health", get(health))
        .merge(auth::router(auth_state))
        .merge(notifications::router(notifications_state))
        .merge(ws::router(ws_state))
        .merge(reminders::router(reminders_state))
}

async fn health() -> &'static str {
    "ok"
}

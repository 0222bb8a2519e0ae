//! Notification API endpoints.
//!
//! Non-admin callers only ever see and modify their own notifications;
//! another user's notification is reported as not found.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::{Auth, AuthenticatedUser};
use crate::db::{Database, NewNotification, Notification, NotificationFilter, NotificationType};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::notifier::Notifier;

const MAX_TITLE_LEN: usize = 255;

#[derive(Clone)]
pub struct NotificationsState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub notifier: Notifier,
}

impl_has_auth_backend!(NotificationsState);

pub fn router(state: NotificationsState) -> Router {
    Router::new()
        .route(
            "/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_as_read))
        .route(
            "/notifications/{id}",
            get(get_notification).delete(delete_notification),
        )
        .route("/notifications/{id}/read", post(mark_as_read))
        .with_state(state)
}

#[derive(Deserialize)]
struct ListQuery {
    user_id: Option<String>,
    #[serde(rename = "type")]
    notification_type: Option<NotificationType>,
    is_read: Option<bool>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse {
    data: Vec<Notification>,
    total: i64,
    page: i64,
    per_page: i64,
}

async fn list_notifications(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = if auth.is_admin() {
        query.user_id
    } else {
        Some(auth.user_id().to_string())
    };

    let filter = NotificationFilter {
        user_id,
        notification_type: query.notification_type,
        is_read: query.is_read,
        page: query.page,
        per_page: query.per_page,
    };
    let (page, per_page) = filter.pagination();

    let (data, total) = state
        .db
        .notifications()
        .list(&filter)
        .await
        .db_err("Failed to list notifications")?;

    Ok(Json(ListResponse {
        data,
        total,
        page,
        per_page,
    }))
}

#[derive(Deserialize)]
struct CreateNotificationRequest {
    /// Target user; defaults to the caller. Only admins may target others.
    user_id: Option<String>,
    title: String,
    message: String,
    #[serde(rename = "type")]
    notification_type: NotificationType,
    data: Option<serde_json::Value>,
}

async fn create_notification(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = match payload.user_id {
        Some(target) if target != auth.user_id() => {
            if !auth.is_admin() {
                return Err(ApiError::forbidden(
                    "Cannot create notifications for another user",
                ));
            }
            target
        }
        _ => auth.user_id().to_string(),
    };

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title cannot be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ApiError::bad_request("Title is too long"));
    }

    let data = payload
        .data
        .map(|value| serde_json::to_string(&value))
        .transpose()
        .map_err(|_| ApiError::bad_request("Invalid data payload"))?;

    let notification = state
        .notifier
        .create(&NewNotification {
            user_id,
            title: title.to_string(),
            message: payload.message,
            notification_type: payload.notification_type,
            data,
        })
        .await
        .db_err("Failed to create notification")?;

    Ok((StatusCode::CREATED, Json(notification)))
}

async fn get_notification(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = load_owned(&state, &auth, &id).await?;
    Ok(Json(notification))
}

async fn mark_as_read(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    load_owned(&state, &auth, &id).await?;

    let notification = state
        .notifier
        .mark_as_read(&id)
        .await
        .db_err("Failed to mark notification as read")?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;

    Ok(Json(notification))
}

#[derive(Serialize)]
struct MarkAllResponse {
    updated: u64,
}

async fn mark_all_as_read(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .notifier
        .mark_all_as_read(auth.user_id())
        .await
        .db_err("Failed to mark notifications as read")?;

    Ok(Json(MarkAllResponse { updated }))
}

async fn delete_notification(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = load_owned(&state, &auth, &id).await?;

    state
        .notifier
        .delete(&notification)
        .await
        .db_err("Failed to delete notification")?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct UnreadCountResponse {
    count: i64,
}

async fn unread_count(
    State(state): State<NotificationsState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .db
        .notifications()
        .unread_count(auth.user_id())
        .await
        .db_err("Failed to count unread notifications")?;

    Ok(Json(UnreadCountResponse { count }))
}

/// Fetch a notification owned by the caller.
async fn load_owned(
    state: &NotificationsState,
    auth: &AuthenticatedUser,
    id: &str,
) -> Result<Notification, ApiError> {
    state
        .db
        .notifications()
        .find_by_id(id)
        .await
        .db_err("Failed to get notification")?
        .filter(|n| n.user_id == auth.user_id())
        .ok_or_else(|| ApiError::not_found("Notification not found"))
}

//! Minimal task and reminder endpoints feeding the reminder scanner.
//!
//! - POST `/tasks` - Create a task owned by the caller
//! - POST `/reminders` - Schedule a reminder, optionally linked to a task
//! - GET `/reminders` - Reminders created by the caller, soonest first

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::Auth;
use crate::db::{Database, NewReminder, Reminder, ReminderType};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

#[derive(Clone)]
pub struct RemindersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(RemindersState);

pub fn router(state: RemindersState) -> Router {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/reminders", post(create_reminder).get(list_reminders))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    title: String,
}

async fn create_task(
    State(state): State<RemindersState>,
    Auth(auth): Auth,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title cannot be empty"));
    }

    let task = state
        .db
        .tasks()
        .create(title, auth.user_id())
        .await
        .db_err("Failed to create task")?;

    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Deserialize)]
struct CreateReminderRequest {
    task_id: Option<String>,
    remind_at: DateTime<Utc>,
    #[serde(default = "default_reminder_type")]
    reminder_type: ReminderType,
    message: Option<String>,
}

fn default_reminder_type() -> ReminderType {
    ReminderType::InApp
}

async fn create_reminder(
    State(state): State<RemindersState>,
    Auth(auth): Auth,
    Json(payload): Json<CreateReminderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(task_id) = &payload.task_id {
        state
            .db
            .tasks()
            .get_by_id(task_id)
            .await
            .db_err("Failed to get task")?
            .filter(|task| task.created_by == auth.user_id())
            .ok_or_else(|| ApiError::not_found("Task not found"))?;
    }

    let id = state
        .db
        .reminders()
        .create(&NewReminder {
            task_id: payload.task_id,
            remind_at: payload.remind_at,
            reminder_type: payload.reminder_type,
            message: payload.message,
            created_by: auth.user_id().to_string(),
        })
        .await
        .db_err("Failed to create reminder")?;

    let reminder = state
        .db
        .reminders()
        .get_by_id(&id)
        .await
        .db_err("Failed to get reminder")?
        .ok_or_else(|| ApiError::internal("Reminder vanished after insert"))?;

    Ok((StatusCode::CREATED, Json(reminder)))
}

#[derive(Serialize)]
struct ListRemindersResponse {
    reminders: Vec<Reminder>,
}

async fn list_reminders(
    State(state): State<RemindersState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let reminders = state
        .db
        .reminders()
        .list_by_creator(auth.user_id())
        .await
        .db_err("Failed to list reminders")?;

    Ok(Json(ListRemindersResponse { reminders }))
}

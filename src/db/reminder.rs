//! Reminder records read and mutated by the reminder scanner.
//!
//! `is_sent` only moves from false to true, and `sent_at` is written in the
//! same statement, so it is set exactly when `is_sent` is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    InApp,
    Email,
    Sms,
}

impl ReminderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderType::InApp => "in_app",
            ReminderType::Email => "email",
            ReminderType::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_app" => Some(ReminderType::InApp),
            "email" => Some(ReminderType::Email),
            "sms" => Some(ReminderType::Sms),
            _ => None,
        }
    }
}

/// The slice of a task embedded in a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: String,
    pub task_id: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub reminder_type: ReminderType,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub created_by: String,
    pub task: Option<TaskRef>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: String,
    task_id: Option<String>,
    remind_at: DateTime<Utc>,
    reminder_type: String,
    is_sent: i32,
    sent_at: Option<DateTime<Utc>>,
    message: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    task_title: Option<String>,
}

impl From<ReminderRow> for Reminder {
    fn from(row: ReminderRow) -> Self {
        let task = match (&row.task_id, row.task_title) {
            (Some(id), Some(title)) => Some(TaskRef {
                id: id.clone(),
                title,
            }),
            _ => None,
        };
        Self {
            id: row.id,
            task_id: row.task_id,
            remind_at: row.remind_at,
            // Unknown channels are treated as out-of-band and only marked sent
            reminder_type: ReminderType::parse(&row.reminder_type).unwrap_or(ReminderType::Email),
            is_sent: row.is_sent != 0,
            sent_at: row.sent_at,
            message: row.message,
            created_by: row.created_by,
            task,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewReminder {
    pub task_id: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub reminder_type: ReminderType,
    pub message: Option<String>,
    pub created_by: String,
}

const REMINDER_SELECT: &str = "SELECT r.id, r.task_id, r.remind_at, r.reminder_type, r.is_sent, r.sent_at, r.message, r.created_by, r.created_at, t.title AS task_title FROM reminders r LEFT JOIN tasks t ON t.id = r.task_id";

#[derive(Clone)]
pub struct ReminderStore {
    pool: SqlitePool,
}

impl ReminderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewReminder) -> Result<String, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO reminders (id, task_id, remind_at, reminder_type, is_sent, message, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.task_id)
        .bind(new.remind_at)
        .bind(new.reminder_type.as_str())
        .bind(&new.message)
        .bind(&new.created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Reminder>, sqlx::Error> {
        let row: Option<ReminderRow> =
            sqlx::query_as(&format!("{} WHERE r.id = ?", REMINDER_SELECT))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Reminder::from))
    }

    /// Unsent reminders whose fire time is at or before `now`, oldest first.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, sqlx::Error> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "{} WHERE r.is_sent = 0 AND r.remind_at <= ? ORDER BY r.remind_at ASC, r.id ASC",
            REMINDER_SELECT
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reminder::from).collect())
    }

    /// Reminders created by a user, soonest first.
    pub async fn list_by_creator(&self, user_id: &str) -> Result<Vec<Reminder>, sqlx::Error> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "{} WHERE r.created_by = ? ORDER BY r.remind_at ASC, r.id ASC",
            REMINDER_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reminder::from).collect())
    }

    /// Mark a reminder sent. Returns false if it was already sent or is missing.
    pub async fn mark_as_sent(&self, id: &str, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reminders SET is_sent = 1, sent_at = ?, updated_at = ? WHERE id = ? AND is_sent = 0",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

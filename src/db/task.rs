use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

/// A task that reminders may point at. Only the fields the reminder
/// pipeline reads are stored here.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, title: &str, created_by: &str) -> Result<Task, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO tasks (id, title, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id,
            title: title.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Task>, sqlx::Error> {
        sqlx::query_as("SELECT id, title, created_by, created_at FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }
}

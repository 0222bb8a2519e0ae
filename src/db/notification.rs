//! User-addressed notification records with read state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, sqlite::SqlitePool};

/// Default page size for notification listings.
pub const DEFAULT_PER_PAGE: i64 = 20;

/// Largest page size a caller may request.
pub const MAX_PER_PAGE: i64 = 100;

/// Highest page number honoured; larger requests are treated as this page.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Reminder,
    Task,
    Deal,
    Activity,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Reminder => "reminder",
            NotificationType::Task => "task",
            NotificationType::Deal => "deal",
            NotificationType::Activity => "activity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reminder" => Some(NotificationType::Reminder),
            "task" => Some(NotificationType::Task),
            "deal" => Some(NotificationType::Deal),
            "activity" => Some(NotificationType::Activity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Opaque payload, stored and returned as written.
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    title: String,
    message: String,
    #[sqlx(rename = "type")]
    notification_type: String,
    is_read: i32,
    read_at: Option<DateTime<Utc>>,
    data: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            message: row.message,
            notification_type: NotificationType::parse(&row.notification_type)
                .unwrap_or(NotificationType::Activity),
            is_read: row.is_read != 0,
            read_at: row.read_at,
            data: row.data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub data: Option<String>,
}

/// Listing filter. Pages are 1-based.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub user_id: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub is_read: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl NotificationFilter {
    /// Effective (page, per_page) after applying defaults and bounds. The
    /// page is capped so the row offset always fits in an `i64`.
    pub fn pagination(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }

    fn push_conditions<'a>(&'a self, builder: &mut QueryBuilder<'a, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(user_id) = &self.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(kind) = self.notification_type {
            builder.push(" AND type = ").push_bind(kind.as_str());
        }
        if let Some(is_read) = self.is_read {
            builder.push(" AND is_read = ").push_bind(is_read as i32);
        }
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, title, message, type, is_read, read_at, data, created_at, updated_at";

#[derive(Clone)]
pub struct NotificationStore {
    pool: SqlitePool,
}

impl NotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an unread notification and return it.
    pub async fn create(&self, new: &NewNotification) -> Result<Notification, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, type, is_read, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.title)
        .bind(&new.message)
        .bind(new.notification_type.as_str())
        .bind(&new.data)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Notification {
            id,
            user_id: new.user_id.clone(),
            title: new.title.clone(),
            message: new.message.clone(),
            notification_type: new.notification_type,
            is_read: false,
            read_at: None,
            data: new.data.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Notification>, sqlx::Error> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM notifications WHERE id = ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Notification::from))
    }

    /// List notifications matching the filter, newest first.
    /// Returns the page and the total number of matching rows.
    pub async fn list(
        &self,
        filter: &NotificationFilter,
    ) -> Result<(Vec<Notification>, i64), sqlx::Error> {
        let (page, per_page) = filter.pagination();

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM notifications");
        filter.push_conditions(&mut count_query);
        let (total,): (i64,) = count_query.build_query_as().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!(
            "SELECT {} FROM notifications",
            NOTIFICATION_COLUMNS
        ));
        filter.push_conditions(&mut query);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind((page - 1).saturating_mul(per_page));

        let rows: Vec<NotificationRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok((rows.into_iter().map(Notification::from).collect(), total))
    }

    /// Mark one notification as read. `read_at` is only written on the first
    /// transition, so repeated calls leave it unchanged. Returns whether the
    /// row changed.
    pub async fn mark_as_read(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ?, updated_at = ? WHERE id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every unread notification owned by a user as read.
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ?, updated_at = ? WHERE user_id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

//! Notification writes paired with hub broadcasts.
//!
//! The store is the source of truth; pushes are best effort. A failed
//! broadcast is logged and never undoes or fails the write.

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::db::{Database, NewNotification, Notification};
use crate::hub::{EventType, Hub};

#[derive(Clone)]
pub struct Notifier {
    db: Database,
    hub: Hub,
}

impl Notifier {
    pub fn new(db: Database, hub: Hub) -> Self {
        Self { db, hub }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Persist a notification and push `notification.created` to its owner.
    pub async fn create(&self, new: &NewNotification) -> Result<Notification, sqlx::Error> {
        let notification = self.db.notifications().create(new).await?;
        self.publish(EventType::NotificationCreated, &notification)
            .await;
        Ok(notification)
    }

    /// Mark read and push `notification.updated` with the stored row. Returns
    /// `None` if the notification no longer exists.
    pub async fn mark_as_read(&self, id: &str) -> Result<Option<Notification>, sqlx::Error> {
        let changed = self.db.notifications().mark_as_read(id).await?;
        let Some(notification) = self.db.notifications().find_by_id(id).await? else {
            return Ok(None);
        };
        if changed {
            self.publish(EventType::NotificationUpdated, &notification)
                .await;
        }
        Ok(Some(notification))
    }

    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        let count = self.db.notifications().mark_all_as_read(user_id).await?;
        if count > 0 {
            self.publish(
                EventType::NotificationUpdated,
                &json!({ "user_id": user_id, "read_all": true, "count": count }),
            )
            .await;
        }
        Ok(count)
    }

    pub async fn delete(&self, notification: &Notification) -> Result<bool, sqlx::Error> {
        let deleted = self.db.notifications().delete(&notification.id).await?;
        if deleted {
            self.publish(
                EventType::NotificationDeleted,
                &json!({ "id": notification.id, "user_id": notification.user_id }),
            )
            .await;
        }
        Ok(deleted)
    }

    async fn publish<T: Serialize>(&self, event_type: EventType, data: &T) {
        if let Err(e) = self.hub.broadcast(event_type, data).await {
            warn!(event_type = ?event_type, error = %e, "Failed to broadcast notification event");
        }
    }
}

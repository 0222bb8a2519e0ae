//! Periodic delivery of due reminders as notifications.
//!
//! Each tick loads unsent reminders whose `remind_at` has passed, oldest
//! first. In-app reminders become a `reminder` notification pushed to the
//! creator; other channels are only marked sent. A reminder is marked sent
//! after its notification is written, so a failure in between is retried on
//! the next tick (at-least-once).

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::{Database, NewNotification, NotificationType, Reminder, ReminderType};
use crate::notifier::Notifier;

/// Outcome of one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// In-app reminders turned into notifications.
    pub notified: usize,
    /// Reminders on other channels that were only marked sent.
    pub skipped: usize,
    /// Reminders left for the next tick after an error.
    pub failed: usize,
}

#[derive(Serialize)]
struct ReminderPayload<'a> {
    reminder_id: &'a str,
    task_id: Option<&'a str>,
    remind_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_title: Option<&'a str>,
}

fn notification_title(reminder: &Reminder) -> String {
    match &reminder.task {
        Some(task) => format!("Task Reminder: {}", task.title),
        None => "Reminder".to_string(),
    }
}

fn notification_message(reminder: &Reminder) -> String {
    if let Some(message) = reminder.message.as_deref().filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    match &reminder.task {
        Some(task) => format!("Task reminder: {}", task.title),
        None => "You have a reminder".to_string(),
    }
}

fn build_notification(reminder: &Reminder) -> Result<NewNotification, serde_json::Error> {
    let payload = ReminderPayload {
        reminder_id: &reminder.id,
        task_id: reminder.task_id.as_deref(),
        remind_at: reminder
            .remind_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        task_title: reminder.task.as_ref().map(|t| t.title.as_str()),
    };

    Ok(NewNotification {
        user_id: reminder.created_by.clone(),
        title: notification_title(reminder),
        message: notification_message(reminder),
        notification_type: NotificationType::Reminder,
        data: Some(serde_json::to_string(&payload)?),
    })
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode reminder payload: {0}")]
    Payload(#[from] serde_json::Error),
}

async fn deliver(
    db: &Database,
    notifier: &Notifier,
    reminder: &Reminder,
    now: DateTime<Utc>,
) -> Result<bool, DeliveryError> {
    if reminder.reminder_type != ReminderType::InApp {
        db.reminders().mark_as_sent(&reminder.id, now).await?;
        return Ok(false);
    }

    let new = build_notification(reminder)?;
    notifier.create(&new).await?;
    db.reminders().mark_as_sent(&reminder.id, now).await?;
    Ok(true)
}

/// Process every reminder due at `now`. Per-reminder failures are logged and
/// counted; only a failure to load the due list is returned.
pub async fn run_tick(
    db: &Database,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> Result<TickReport, sqlx::Error> {
    let due = db.reminders().find_due(now).await?;
    let mut report = TickReport::default();

    for reminder in &due {
        match deliver(db, notifier, reminder, now).await {
            Ok(true) => report.notified += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                error!(reminder_id = %reminder.id, error = %e, "Failed to deliver reminder");
            }
        }
    }

    if !due.is_empty() {
        info!(
            notified = report.notified,
            skipped = report.skipped,
            failed = report.failed,
            "Processed due reminders"
        );
    }
    Ok(report)
}

/// Spawn the scanner. It ticks every `period` and exits within one tick of
/// `shutdown` flipping to `true`.
pub fn spawn_reminder_scanner(
    db: Database,
    notifier: Notifier,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_tick(&db, &notifier, Utc::now()).await {
                        error!(error = %e, "Failed to load due reminders");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reminder scanner stopped");
    })
}

//! Scheduled deletion of expired refresh tokens.

use crate::db::Database;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Delete expired refresh tokens once. Returns the number removed.
pub async fn run_cleanup(db: &Database) -> Result<u64, sqlx::Error> {
    let count = db.tokens().delete_expired().await?;
    if count > 0 {
        info!(count, "Cleaned up expired refresh tokens");
    }
    Ok(count)
}

/// Spawn the reaper. A failed cycle is logged and the next one runs as
/// scheduled; the task exits within one tick of `shutdown` flipping to `true`.
pub fn spawn_cleanup_scheduler(
    db: Database,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_cleanup(&db).await {
                        error!(error = %e, "Failed to clean up expired refresh tokens");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Token reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewRefreshToken, UserStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_cleanup_failure_does_not_stop_scheduler() {
        let db = Database::open(":memory:").await.unwrap();
        db.pool().close().await;

        assert!(run_cleanup(&db).await.is_err());

        let (tx, rx) = watch::channel(false);
        let handle = spawn_cleanup_scheduler(db, Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_runs_first_cycle_immediately() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create("a@x", "hash", UserStatus::Active, None)
            .await
            .unwrap();
        db.tokens()
            .create(&NewRefreshToken {
                user_id: user.id,
                token_id: "stale".to_string(),
                expires_at: Utc::now() - chrono::Duration::minutes(1),
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_cleanup_scheduler(db.clone(), Duration::from_secs(3600), rx);

        let mut purged = false;
        for _ in 0..100 {
            if db.tokens().find_by_token_id("stale").await.unwrap().is_none() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(purged);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

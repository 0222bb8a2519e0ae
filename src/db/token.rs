//! Refresh token storage for rotation and revocation tracking.
//!
//! Only refresh tokens are stored in the database. Access tokens are stateless.
//! A record is valid iff it is not revoked and `now < expires_at`; revocation is
//! one-way, and `revoked_at` is set exactly when `revoked` is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

/// A stored refresh token record.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: String,
    user_id: String,
    token_id: String,
    expires_at: DateTime<Utc>,
    revoked: i32,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_id: row.token_id,
            expires_at: row.expires_at,
            revoked: row.revoked != 0,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Fields supplied when persisting a freshly issued refresh token.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

const TOKEN_COLUMNS: &str =
    "id, user_id, token_id, expires_at, revoked, revoked_at, created_at, updated_at";

/// Store for managing refresh tokens.
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new refresh token record. The `token_id` must be fresh.
    pub async fn create(&self, token: &NewRefreshToken) -> Result<String, sqlx::Error> {
        insert(&self.pool, token).await
    }

    /// Get a refresh token record by its JWT ID.
    pub async fn find_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_id = ?",
            TOKEN_COLUMNS
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// List all refresh token records for a user, newest first.
    pub async fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            TOKEN_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Revoke a token by its JWT ID. Idempotent: an already-revoked record keeps
    /// its original `revoked_at`. Returns whether this call changed the record.
    pub async fn revoke(&self, token_id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, updated_at = ? WHERE token_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(now)
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every unrevoked token belonging to a user (logout everywhere).
    pub async fn revoke_by_user_id(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, updated_at = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete all expired tokens, revoked or not.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomically revoke `old_token_id` and persist `replacement`.
    ///
    /// Returns `Ok(false)` without inserting anything when the old token was
    /// already revoked, so two concurrent rotations of one token cannot both win.
    pub async fn rotate(
        &self,
        old_token_id: &str,
        replacement: &NewRefreshToken,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, updated_at = ? WHERE token_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(now)
        .bind(old_token_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert(&mut *tx, replacement).await?;
        tx.commit().await?;
        Ok(true)
    }
}

async fn insert<'e, E>(executor: E, token: &NewRefreshToken) -> Result<String, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, token_id, expires_at, revoked, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id)
    .bind(&token.user_id)
    .bind(&token.token_id)
    .bind(token.expires_at)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, UserStatus};
    use chrono::Duration;

    async fn setup() -> (Database, String) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create("a@x", "hash", UserStatus::Active, None)
            .await
            .unwrap();
        (db, user.id)
    }

    fn new_token(user_id: &str, jti: &str, ttl: Duration) -> NewRefreshToken {
        NewRefreshToken {
            user_id: user_id.to_string(),
            token_id: jti.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (db, user_id) = setup().await;
        db.tokens()
            .create(&new_token(&user_id, "jti-1", Duration::days(7)))
            .await
            .unwrap();

        let record = db.tokens().find_by_token_id("jti-1").await.unwrap().unwrap();
        assert_eq!(record.user_id, user_id);
        assert!(!record.revoked);
        assert!(record.revoked_at.is_none());
        assert!(record.is_valid_at(Utc::now()));

        assert!(db.tokens().find_by_token_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_id_fails() {
        let (db, user_id) = setup().await;
        let token = new_token(&user_id, "jti-1", Duration::days(7));
        db.tokens().create(&token).await.unwrap();
        assert!(db.tokens().create(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_keeps_first_timestamp() {
        let (db, user_id) = setup().await;
        db.tokens()
            .create(&new_token(&user_id, "jti-1", Duration::days(7)))
            .await
            .unwrap();

        assert!(db.tokens().revoke("jti-1").await.unwrap());
        let first = db.tokens().find_by_token_id("jti-1").await.unwrap().unwrap();
        assert!(first.revoked);
        assert!(first.revoked_at.is_some());

        assert!(!db.tokens().revoke("jti-1").await.unwrap());
        let second = db.tokens().find_by_token_id("jti-1").await.unwrap().unwrap();
        assert!(second.revoked);
        assert_eq!(second.revoked_at, first.revoked_at);

        // Unknown tokens are not an error
        assert!(!db.tokens().revoke("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_by_user_id() {
        let (db, user_id) = setup().await;
        for jti in ["a", "b", "c"] {
            db.tokens()
                .create(&new_token(&user_id, jti, Duration::days(7)))
                .await
                .unwrap();
        }
        db.tokens().revoke("a").await.unwrap();

        assert_eq!(db.tokens().revoke_by_user_id(&user_id).await.unwrap(), 2);
        let records = db.tokens().find_by_user_id(&user_id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.revoked && r.revoked_at.is_some()));
    }

    #[tokio::test]
    async fn test_find_by_user_id_newest_first() {
        let (db, user_id) = setup().await;
        db.tokens()
            .create(&new_token(&user_id, "older", Duration::days(7)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.tokens()
            .create(&new_token(&user_id, "newer", Duration::days(7)))
            .await
            .unwrap();

        let records = db.tokens().find_by_user_id(&user_id).await.unwrap();
        assert_eq!(records[0].token_id, "newer");
        assert_eq!(records[1].token_id, "older");
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (db, user_id) = setup().await;
        db.tokens()
            .create(&new_token(&user_id, "expired", Duration::hours(-1)))
            .await
            .unwrap();
        db.tokens()
            .create(&new_token(&user_id, "expired-revoked", Duration::hours(-1)))
            .await
            .unwrap();
        db.tokens().revoke("expired-revoked").await.unwrap();
        db.tokens()
            .create(&new_token(&user_id, "live", Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(db.tokens().delete_expired().await.unwrap(), 2);
        assert_eq!(db.tokens().delete_expired().await.unwrap(), 0);
        assert!(db.tokens().find_by_token_id("expired").await.unwrap().is_none());
        assert!(db.tokens().find_by_token_id("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let (db, user_id) = setup().await;
        db.tokens()
            .create(&new_token(&user_id, "old", Duration::days(7)))
            .await
            .unwrap();

        let first = new_token(&user_id, "new-1", Duration::days(7));
        assert!(db.tokens().rotate("old", &first).await.unwrap());

        let second = new_token(&user_id, "new-2", Duration::days(7));
        assert!(!db.tokens().rotate("old", &second).await.unwrap());

        assert!(db.tokens().find_by_token_id("old").await.unwrap().unwrap().revoked);
        assert!(!db.tokens().find_by_token_id("new-1").await.unwrap().unwrap().revoked);
        assert!(db.tokens().find_by_token_id("new-2").await.unwrap().is_none());
    }
}

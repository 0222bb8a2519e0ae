//! Login, refresh-token rotation and logout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::password::verify_password;
use crate::db::{Database, NewRefreshToken, RefreshTokenRecord, User, UserStatus};
use crate::jwt::{JwtConfig, JwtError};

/// Role code assumed when a user has none assigned.
pub const DEFAULT_ROLE: &str = "user";

/// What to do when an already-rotated refresh token is presented again.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Reject the request only.
    #[default]
    Reject,
    /// Reject and revoke every outstanding refresh token of the owner.
    RevokeFamily,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("User account is inactive")]
    UserInactive,
    #[error("Invalid refresh token")]
    RefreshInvalid,
    #[error("Refresh token has been revoked")]
    RefreshRevoked,
    #[error("Refresh token has expired")]
    RefreshExpired,
    #[error("User not found")]
    UserNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("token error: {0}")]
    Token(#[from] JwtError),
    #[error("password hash error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

impl AuthError {
    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "ErrInvalidCredentials",
            AuthError::UserInactive => "ErrUserInactive",
            AuthError::RefreshInvalid => "ErrRefreshInvalid",
            AuthError::RefreshRevoked => "ErrRefreshRevoked",
            AuthError::RefreshExpired => "ErrRefreshExpired",
            AuthError::UserNotFound => "ErrUserNotFound",
            AuthError::Database(_) | AuthError::Token(_) | AuthError::PasswordHash(_) => {
                "ErrInternal"
            }
        }
    }
}

/// Tokens handed to a client after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: User,
    #[serde(rename = "token")]
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    jwt: Arc<JwtConfig>,
    replay_policy: ReplayPolicy,
}

impl AuthService {
    pub fn new(db: Database, jwt: Arc<JwtConfig>, replay_policy: ReplayPolicy) -> Self {
        Self {
            db,
            jwt,
            replay_policy,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = self
            .db
            .users()
            .get_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if user.status != UserStatus::Active {
            return Err(AuthError::UserInactive);
        }

        // A corrupt stored hash is treated like a wrong password
        let matches = verify_password(password, &user.password_hash).unwrap_or_else(|e| {
            warn!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
            false
        });
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let (access_token, refresh) = self.issue_pair(&user)?;
        self.db.tokens().create(&refresh.record).await?;

        info!(user_id = %user.id, "User logged in");
        Ok(AuthSession {
            user,
            access_token,
            refresh_token: refresh.token,
            expires_in: self.jwt.access_ttl_secs(),
        })
    }

    /// Exchange a refresh token for a new pair. The presented token is revoked
    /// in the same transaction that stores its replacement, so it can be used
    /// at most once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let claims = self
            .jwt
            .validate_refresh_token(refresh_token)
            .map_err(|_| AuthError::RefreshInvalid)?;

        let record = self
            .db
            .tokens()
            .find_by_token_id(&claims.jti)
            .await?
            .ok_or(AuthError::RefreshInvalid)?;

        if record.revoked {
            self.on_replay(&record).await?;
            return Err(AuthError::RefreshRevoked);
        }
        if record.is_expired_at(Utc::now()) {
            return Err(AuthError::RefreshExpired);
        }
        if record.user_id != claims.sub {
            return Err(AuthError::RefreshInvalid);
        }

        let user = self
            .db
            .users()
            .get_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.status != UserStatus::Active {
            return Err(AuthError::UserInactive);
        }

        let (access_token, refresh) = self.issue_pair(&user)?;
        if !self.db.tokens().rotate(&claims.jti, &refresh.record).await? {
            // Lost a race with a concurrent refresh of the same token
            return Err(AuthError::RefreshRevoked);
        }

        Ok(AuthSession {
            user,
            access_token,
            refresh_token: refresh.token,
            expires_in: self.jwt.access_ttl_secs(),
        })
    }

    /// Revoke the presented refresh token. Never fails: malformed, unknown
    /// and already-revoked tokens all count as logged out.
    pub async fn logout(&self, refresh_token: &str) {
        let Ok(jti) = self.jwt.extract_jti(refresh_token) else {
            return;
        };
        if let Err(e) = self.db.tokens().revoke(&jti).await {
            error!(error = %e, "Failed to revoke refresh token on logout");
        }
    }

    /// Revoke every outstanding refresh token of a user.
    pub async fn logout_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let count = self.db.tokens().revoke_by_user_id(user_id).await?;
        info!(user_id = %user_id, count, "Revoked all sessions");
        Ok(count)
    }

    /// Refresh token records of a user, newest first.
    pub async fn sessions(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        Ok(self.db.tokens().find_by_user_id(user_id).await?)
    }

    async fn on_replay(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        match self.replay_policy {
            ReplayPolicy::Reject => {
                warn!(user_id = %record.user_id, "Revoked refresh token presented");
            }
            ReplayPolicy::RevokeFamily => {
                let count = self.db.tokens().revoke_by_user_id(&record.user_id).await?;
                warn!(
                    user_id = %record.user_id,
                    count,
                    "Revoked refresh token presented, revoked all sessions"
                );
            }
        }
        Ok(())
    }

    fn issue_pair(&self, user: &User) -> Result<(String, IssuedRefresh), AuthError> {
        let role = user.role_code.as_deref().unwrap_or(DEFAULT_ROLE);
        let access_token = self.jwt.generate_access_token(&user.id, &user.email, role)?;
        let refresh = self.jwt.generate_refresh_token(&user.id)?;

        let expires_at = DateTime::<Utc>::from_timestamp(refresh.expires_at as i64, 0)
            .ok_or(JwtError::TimeError)?;

        Ok((
            access_token,
            IssuedRefresh {
                token: refresh.token,
                record: NewRefreshToken {
                    user_id: user.id.clone(),
                    token_id: refresh.jti,
                    expires_at,
                },
            },
        ))
    }
}

struct IssuedRefresh {
    token: String,
    record: NewRefreshToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password_with_cost;

    const SECRET: &[u8] = b"test-secret-key-for-testing-0123456789";

    async fn setup(policy: ReplayPolicy) -> (AuthService, Database, String) {
        let db = Database::open(":memory:").await.unwrap();
        let hash = hash_password_with_cost("pw", 4).unwrap();
        let user = db
            .users()
            .create("a@x", &hash, UserStatus::Active, Some("sales"))
            .await
            .unwrap();
        let service = AuthService::new(
            db.clone(),
            Arc::new(JwtConfig::with_defaults(SECRET)),
            policy,
        );
        (service, db, user.id)
    }

    #[tokio::test]
    async fn test_login_issues_tracked_refresh_token() {
        let (service, db, user_id) = setup(ReplayPolicy::Reject).await;
        let session = service.login("a@x", "pw").await.unwrap();
        assert_eq!(session.expires_in, 86400);

        let jti = JwtConfig::with_defaults(SECRET)
            .extract_jti(&session.refresh_token)
            .unwrap();
        let record = db.tokens().find_by_token_id(&jti).await.unwrap().unwrap();
        assert_eq!(record.user_id, user_id);
        assert!(!record.revoked);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (service, db, user_id) = setup(ReplayPolicy::Reject).await;
        assert!(matches!(
            service.login("a@x", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login("nobody@x", "pw").await,
            Err(AuthError::InvalidCredentials)
        ));

        db.users()
            .set_status(&user_id, UserStatus::Inactive)
            .await
            .unwrap();
        assert!(matches!(
            service.login("a@x", "pw").await,
            Err(AuthError::UserInactive)
        ));
    }

    #[tokio::test]
    async fn test_role_defaults_to_user() {
        let (service, db, _) = setup(ReplayPolicy::Reject).await;
        let hash = hash_password_with_cost("pw", 4).unwrap();
        db.users()
            .create("b@x", &hash, UserStatus::Active, None)
            .await
            .unwrap();

        let session = service.login("b@x", "pw").await.unwrap();
        let claims = JwtConfig::with_defaults(SECRET)
            .validate_access_token(&session.access_token)
            .unwrap();
        assert_eq!(claims.role, DEFAULT_ROLE);
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let (service, _db, _) = setup(ReplayPolicy::Reject).await;
        let first = service.login("a@x", "pw").await.unwrap();

        let second = service.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        assert!(matches!(
            service.refresh(&first.refresh_token).await,
            Err(AuthError::RefreshRevoked)
        ));
        // Reject policy leaves the new token usable
        assert!(service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_revokes_family() {
        let (service, db, user_id) = setup(ReplayPolicy::RevokeFamily).await;
        let first = service.login("a@x", "pw").await.unwrap();
        let second = service.refresh(&first.refresh_token).await.unwrap();

        assert!(matches!(
            service.refresh(&first.refresh_token).await,
            Err(AuthError::RefreshRevoked)
        ));
        assert!(matches!(
            service.refresh(&second.refresh_token).await,
            Err(AuthError::RefreshRevoked)
        ));
        let records = db.tokens().find_by_user_id(&user_id).await.unwrap();
        assert!(records.iter().all(|r| r.revoked));
    }

    #[tokio::test]
    async fn test_refresh_with_garbage_is_invalid() {
        let (service, _db, _) = setup(ReplayPolicy::Reject).await;
        assert!(matches!(
            service.refresh("garbage").await,
            Err(AuthError::RefreshInvalid)
        ));

        let session = service.login("a@x", "pw").await.unwrap();
        assert!(matches!(
            service.refresh(&session.access_token).await,
            Err(AuthError::RefreshInvalid)
        ));
    }

    #[tokio::test]
    async fn test_refresh_unknown_jti_is_invalid() {
        let (service, _db, user_id) = setup(ReplayPolicy::Reject).await;
        // Signed correctly but never persisted
        let orphan = JwtConfig::with_defaults(SECRET)
            .generate_refresh_token(&user_id)
            .unwrap();
        assert!(matches!(
            service.refresh(&orphan.token).await,
            Err(AuthError::RefreshInvalid)
        ));
    }

    #[tokio::test]
    async fn test_refresh_expired_record() {
        let (service, db, _) = setup(ReplayPolicy::Reject).await;
        let session = service.login("a@x", "pw").await.unwrap();
        let jti = JwtConfig::with_defaults(SECRET)
            .extract_jti(&session.refresh_token)
            .unwrap();
        sqlx::query("UPDATE refresh_tokens SET expires_at = ? WHERE token_id = ?")
            .bind(Utc::now() - chrono::Duration::seconds(1))
            .bind(&jti)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(
            service.refresh(&session.refresh_token).await,
            Err(AuthError::RefreshExpired)
        ));
    }

    #[tokio::test]
    async fn test_refresh_inactive_user() {
        let (service, db, user_id) = setup(ReplayPolicy::Reject).await;
        let session = service.login("a@x", "pw").await.unwrap();
        db.users()
            .set_status(&user_id, UserStatus::Inactive)
            .await
            .unwrap();
        assert!(matches!(
            service.refresh(&session.refresh_token).await,
            Err(AuthError::UserInactive)
        ));
    }

    #[tokio::test]
    async fn test_logout_then_refresh_fails() {
        let (service, _db, _) = setup(ReplayPolicy::Reject).await;
        let session = service.login("a@x", "pw").await.unwrap();

        service.logout(&session.refresh_token).await;
        service.logout(&session.refresh_token).await;
        service.logout("garbage").await;

        assert!(matches!(
            service.refresh(&session.refresh_token).await,
            Err(AuthError::RefreshRevoked)
        ));
    }

    #[tokio::test]
    async fn test_logout_all_and_sessions() {
        let (service, _db, user_id) = setup(ReplayPolicy::Reject).await;
        service.login("a@x", "pw").await.unwrap();
        service.login("a@x", "pw").await.unwrap();

        assert_eq!(service.sessions(&user_id).await.unwrap().len(), 2);
        assert_eq!(service.logout_all(&user_id).await.unwrap(), 2);
        assert_eq!(service.logout_all(&user_id).await.unwrap(), 0);
        assert!(
            service
                .sessions(&user_id)
                .await
                .unwrap()
                .iter()
                .all(|r| r.revoked)
        );
    }
}

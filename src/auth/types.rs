//! Authentication user types.

use crate::jwt::AccessClaims;

/// Role code that may list any user's notifications and create notifications
/// for other users. Single-notification reads and writes stay owner-only.
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated user information extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.role == ADMIN_ROLE
    }
}

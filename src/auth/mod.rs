//! Bearer-token authentication.
//!
//! Dual-token system: stateless access tokens checked on every request and
//! database-tracked refresh tokens that are rotated on each use.

mod errors;
mod extractors;
mod ip;
mod password;
mod service;
mod state;
mod token_source;
mod types;

pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::Auth;
pub use ip::{UNKNOWN_CLIENT, client_ip};
pub use password::{hash_password, hash_password_with_cost, verify_password};
pub use service::{AuthError, AuthService, AuthSession, DEFAULT_ROLE, ReplayPolicy};
pub use state::HasAuthBackend;
pub use token_source::{bearer_token, query_token, request_token};
pub use types::{ADMIN_ROLE, AuthenticatedUser};

//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::token_source::request_token;
use super::types::AuthenticatedUser;

/// Verify the access token carried by a request. Access tokens are stateless,
/// so this never touches the database.
fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend,
{
    let token =
        request_token(&parts.headers, &parts.uri).ok_or(AuthErrorKind::NotAuthenticated)?;
    let claims = state.jwt().validate_access_token(token)?;
    Ok(AuthenticatedUser { claims })
}

/// Extractor for endpoints that require a valid access token, taken from
/// `Authorization: Bearer` or the `token` query parameter.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state)
            .map(Auth)
            .map_err(ApiAuthError::new)
    }
}

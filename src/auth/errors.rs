//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::jwt::JwtError;

/// Internal auth error kind used by the extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    ExpiredToken,
}

impl From<JwtError> for AuthErrorKind {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Expired => AuthErrorKind::ExpiredToken,
            _ => AuthErrorKind::InvalidToken,
        }
    }
}

/// Rejection returned by the authentication extractors.
#[derive(Debug)]
pub struct ApiAuthError {
    pub(super) kind: AuthErrorKind,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "Not authenticated",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::ExpiredToken => "Token expired",
        }
    }

    fn code(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "ErrUnauthorized",
            AuthErrorKind::InvalidToken => "ErrInvalidToken",
            AuthErrorKind::ExpiredToken => "ErrExpiredToken",
        }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            code: &'static str,
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}

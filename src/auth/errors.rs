//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, info};

use crate::jwt::JwtError;

/// Why a request could not be attributed to an active user.
///
/// Every variant except `Forbidden` and `Database` reaches the client as the
/// same 401 body; the variant itself is only logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingToken,
    #[error(transparent)]
    Token(#[from] JwtError),
    #[error("user not found")]
    UserNotFound,
    #[error("account is inactive")]
    InactiveAccount,
    #[error("admin access required")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// API authentication rejection.
#[derive(Debug)]
pub struct ApiAuthError {
    kind: AuthError,
}

impl ApiAuthError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthError::MissingToken
            | AuthError::Token(_)
            | AuthError::UserNotFound
            | AuthError::InactiveAccount => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthError::MissingToken
            | AuthError::Token(_)
            | AuthError::UserNotFound
            | AuthError::InactiveAccount => "Could not validate credentials",
            AuthError::Forbidden => "Admin access required",
            AuthError::Database(_) => "Database error",
        }
    }
}

impl From<AuthError> for ApiAuthError {
    fn from(kind: AuthError) -> Self {
        match &kind {
            AuthError::Database(e) => error!(error = %e, "Authentication lookup failed"),
            other => info!(reason = %other, "Request rejected by authentication"),
        }
        Self { kind }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let status = self.status_code();
        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}

//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

use crate::accounts::AccountError;
use crate::chat::ChatError;
use crate::documents::DocumentError;
use crate::usage::UsageError;

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("Database error".into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::EmailAlreadyRegistered => Self::bad_request("Email already registered"),
            AccountError::InvalidEmail => Self::bad_request("Invalid email address"),
            AccountError::InvalidPassword(msg) => Self::bad_request(msg),
            AccountError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            AccountError::InactiveAccount => Self::unauthorized("Account is inactive"),
            AccountError::InvalidToken(ref inner) => {
                warn!(error = %inner, "Rejected refresh token");
                Self::unauthorized("Invalid refresh token")
            }
            AccountError::TokenRevoked | AccountError::UserNotFound => {
                warn!(error = %e, "Rejected refresh token");
                Self::unauthorized("Invalid refresh token")
            }
            AccountError::Database(inner) => Self::db_error("Account operation failed", inner),
            AccountError::TokenIssue(_) | AccountError::Hashing(_) => {
                error!(error = %e, "Account operation failed");
                Self::internal("Internal error")
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        error!(error = %e, "Chat request failed");
        Self::internal("Chat error: the answer engine is unavailable")
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidFilename => Self::bad_request("Invalid file name"),
            DocumentError::NotPdf => Self::bad_request("Only PDF files are allowed"),
            DocumentError::NoDocuments => Self::bad_request("No PDF documents found"),
            DocumentError::NotFound(name) => {
                Self::not_found(format!("Document '{}' not found", name))
            }
            DocumentError::IndexFailed { .. } | DocumentError::IndexTimedOut { .. } => {
                Self::internal(e.to_string())
            }
            DocumentError::IndexerUnavailable(_) | DocumentError::Io(_) => {
                error!(error = %e, "Document operation failed");
                Self::internal("Document storage error")
            }
        }
    }
}

impl From<UsageError> for ApiError {
    fn from(e: UsageError) -> Self {
        match e {
            UsageError::InvalidPeriod => Self::bad_request(e.to_string()),
            UsageError::NotConfigured => Self::internal("ADMIN_KEY not configured"),
            UsageError::Request(_) => {
                error!(error = %e, "Usage report failed");
                Self::internal("Failed to fetch usage data")
            }
        }
    }
}

/// Validate a UUID string format.
pub fn validate_uuid(uuid: &str) -> Result<(), ApiError> {
    if uuid.is_empty() {
        return Err(ApiError::bad_request("UUID cannot be empty"));
    }
    if uuid.len() > 36 {
        return Err(ApiError::bad_request("UUID is too long"));
    }
    if uuid::Uuid::parse_str(uuid).is_err() {
        return Err(ApiError::bad_request("Invalid UUID format"));
    }
    Ok(())
}

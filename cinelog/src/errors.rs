use std::collections::HashMap;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::db::errors::DbError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No usable credential was presented on a route that requires one
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A credential was presented but could not be resolved to a user
    #[error("Invalid or missing authentication token")]
    InvalidAuthenticationToken,

    /// Email/password pair did not match any account
    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    /// The account exists but has not been activated yet
    #[error("Account not activated")]
    InactiveAccount,

    /// The account lacks the permission code required by the route
    #[error("Missing required permission")]
    NotPermitted,

    /// Malformed request body or parameters
    #[error("{message}")]
    BadRequest { message: String },

    /// Field-level validation failures, keyed by field name
    #[error("Validation failed")]
    FailedValidation { errors: HashMap<String, String> },

    /// Requested resource not found
    #[error("Resource not found")]
    NotFound,

    /// Optimistic-concurrency version mismatch on update
    #[error("Edit conflict")]
    EditConflict,

    /// Client exceeded its request budget
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Known route, unsupported HTTP method
    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AuthenticationRequired | Error::InvalidAuthenticationToken | Error::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Error::InactiveAccount | Error::NotPermitted => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::FailedValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::EditConflict => StatusCode::CONFLICT,
            Error::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthenticationRequired => "you must be authenticated to access this resource".to_string(),
            Error::InvalidAuthenticationToken => "invalid or missing authentication token".to_string(),
            Error::InvalidCredentials => "invalid authentication credentials".to_string(),
            Error::InactiveAccount => "your user account must be activated to access this resource".to_string(),
            Error::NotPermitted => {
                "your user account doesn't have the necessary permissions to access this resource".to_string()
            }
            Error::BadRequest { message } => message.clone(),
            Error::FailedValidation { .. } => "one or more fields failed validation".to_string(),
            Error::NotFound | Error::Database(DbError::NotFound) => {
                "the requested resource could not be found".to_string()
            }
            Error::EditConflict => "unable to update the record due to an edit conflict, please try again".to_string(),
            Error::RateLimitExceeded => "rate limit exceeded".to_string(),
            Error::MethodNotAllowed { method } => {
                format!("the {method} method is not supported for this resource")
            }
            Error::Database(DbError::UniqueViolation { constraint, table, .. }) => {
                match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => {
                        "a user with this email address already exists".to_string()
                    }
                    _ => "the resource already exists".to_string(),
                }
            }
            Error::Database(DbError::ForeignKeyViolation { .. }) => "invalid reference to a related resource".to_string(),
            Error::Database(DbError::CheckViolation { .. }) => "invalid data provided".to_string(),
            Error::Internal { .. } | Error::Other(_) | Error::Database(DbError::Other(_)) => {
                "the server encountered a problem and could not process your request".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Full details are logged here; the client only ever sees user_message()
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("internal service error: {:#}", self);
            }
            Error::Database(_) | Error::EditConflict => {
                tracing::warn!("database constraint error: {}", self);
            }
            Error::AuthenticationRequired
            | Error::InvalidAuthenticationToken
            | Error::InvalidCredentials
            | Error::InactiveAccount
            | Error::NotPermitted
            | Error::RateLimitExceeded => {
                tracing::info!("request rejected: {}", self);
            }
            Error::BadRequest { .. }
            | Error::FailedValidation { .. }
            | Error::NotFound
            | Error::MethodNotAllowed { .. } => {
                tracing::debug!("client error: {}", self);
            }
        }

        let status = self.status_code();

        let body = match &self {
            Error::FailedValidation { errors } => json!({ "error": errors }),
            _ => json!({ "error": self.user_message() }),
        };

        let mut response = (status, axum::response::Json(body)).into_response();

        if matches!(self, Error::InvalidAuthenticationToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::AuthenticationRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InactiveAccount.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotPermitted.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::EditConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::FailedValidation { errors: HashMap::new() }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(Error::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_duplicate_email_message() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("users_email_key".to_string()),
            table: Some("users".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "a user with this email address already exists");
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = Error::Internal {
            operation: "connect to database at 10.0.0.3".to_string(),
        };
        assert!(!err.user_message().contains("10.0.0.3"));
    }
}

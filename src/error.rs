use std::collections::HashMap;

use serde_json::json;
use thiserror::Error;

use crate::response::{Response, ResponseCode};
use crate::router::AuthLevel;

/// Body text used for every 500. Internal detail only goes to the logs.
pub const GENERIC_SERVER_ERROR: &str = "An internal error occurred while processing your request";

/// TokenFault
///
/// Which part of a token failed. Carried by `ApiError::InvalidToken` so the logs
/// say more than "unauthorized", while the client always sees the same 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenFault {
    #[error("token missing")]
    Missing,
    #[error("token malformed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token is of the wrong kind")]
    WrongKind,
    #[error("token has been revoked or already rotated")]
    Revoked,
    #[error("token subject is unknown")]
    UnknownSubject,
}

/// ApiError
///
/// The closed set of failure kinds. Everything below the router's dispatch boundary
/// returns one of these; `to_response` is the single place they become client-visible.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("routing failed: {0}")]
    Routing(String),

    #[error("invalid token: {0}")]
    InvalidToken(TokenFault),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("insufficient privilege: {required:?} access required")]
    Forbidden { required: AuthLevel },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field_errors: HashMap<String, String>,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("password hashing failed: {0}")]
    PasswordHashing(String),

    #[error("unsupported response code {0}")]
    UnsupportedResponseCode(u16),

    #[error("route {method} {pattern} is already registered")]
    DuplicateRoute { method: String, pattern: String },

    #[error("invalid route pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field_errors: HashMap::new(),
        }
    }

    pub fn validation_field(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut field_errors = HashMap::new();
        field_errors.insert(field.into(), problem.into());
        ApiError::Validation {
            message: "Invalid field format".to_string(),
            field_errors,
        }
    }

    /// Status code this failure translates to.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            ApiError::Routing(_) | ApiError::NotFound(_) => ResponseCode::NotFound,
            ApiError::InvalidToken(_) | ApiError::InvalidCredentials => ResponseCode::Unauthorized,
            ApiError::Forbidden { .. } => ResponseCode::Forbidden,
            ApiError::BadRequest(_) => ResponseCode::BadRequest,
            ApiError::Conflict(_) => ResponseCode::Conflict,
            ApiError::Validation { .. } => ResponseCode::UnprocessableEntity,
            ApiError::Database(_)
            | ApiError::PasswordHashing(_)
            | ApiError::UnsupportedResponseCode(_)
            | ApiError::DuplicateRoute { .. }
            | ApiError::InvalidPattern { .. }
            | ApiError::Unexpected(_) => ResponseCode::InternalServerError,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Routing(_) => "ROUTE_NOT_FOUND",
            ApiError::InvalidToken(_) => "INVALID_TOKEN",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Database(_)
            | ApiError::PasswordHashing(_)
            | ApiError::UnsupportedResponseCode(_)
            | ApiError::DuplicateRoute { .. }
            | ApiError::InvalidPattern { .. }
            | ApiError::Unexpected(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// to_response
    ///
    /// Converts the failure into the one Response a client is allowed to see.
    /// Server-side kinds are logged in full and answered with `GENERIC_SERVER_ERROR`.
    /// Token failures all share one message so a client cannot probe which check failed.
    pub fn to_response(&self) -> Response {
        let message = match self {
            ApiError::Routing(_) => "No route matches the requested path".to_string(),
            ApiError::InvalidToken(fault) => {
                tracing::debug!(%fault, "rejecting request with invalid token");
                "Invalid or missing token".to_string()
            }
            ApiError::InvalidCredentials => "Invalid email or password".to_string(),
            ApiError::Forbidden { required } => {
                format!("{:?} privileges are required for this resource", required)
            }
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => {
                msg.clone()
            }
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::Database(_)
            | ApiError::PasswordHashing(_)
            | ApiError::UnsupportedResponseCode(_)
            | ApiError::DuplicateRoute { .. }
            | ApiError::InvalidPattern { .. }
            | ApiError::Unexpected(_) => {
                tracing::error!(error = %self, "request failed with internal error");
                GENERIC_SERVER_ERROR.to_string()
            }
        };

        let mut body = json!({
            "error": true,
            "code": self.error_code(),
            "message": message,
        });
        if let ApiError::Validation { field_errors, .. } = self {
            if !field_errors.is_empty() {
                body["field_errors"] = json!(field_errors);
            }
        }

        Response::with_body(self.response_code(), body)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ApiError::PasswordHashing(err.to_string())
    }
}

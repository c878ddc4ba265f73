use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// SQLSTATE raised by UNIQUE constraints.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE raised by EXCLUDE constraints (overlapping ranges).
const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized ({0}): {1}")]
    Unauthorized(&'static str, String),
    #[error("forbidden ({0}): {1}")]
    Forbidden(&'static str, String),
    #[error("validation failed ({0}): {1}")]
    Validation(&'static str, String),
    #[error("not found ({0}): {1}")]
    NotFound(&'static str, String),
    #[error("conflict ({0}): {1}")]
    Conflict(&'static str, String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation("VALIDATION_ERROR", message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::Validation(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::Validation(code, _)
            | ApiError::NotFound(code, _)
            | ApiError::Conflict(code, _) => code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized(_, msg)
            | ApiError::Forbidden(_, msg)
            | ApiError::Validation(_, msg)
            | ApiError::NotFound(_, msg)
            | ApiError::Conflict(_, msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

/// Constraint violations become conflicts, everything else is an internal failure.
impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    return ApiError::Conflict(
                        "UNIQUE_VIOLATION",
                        format!("conflicting record: {}", db.message()),
                    );
                }
                Some(EXCLUSION_VIOLATION) => {
                    return ApiError::Conflict(
                        "OVERLAP_VIOLATION",
                        format!("overlapping appointment: {}", db.message()),
                    );
                }
                _ => {}
            }
        }
        ApiError::Internal(format!("db error: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!(error = %msg, "request failed");
        }
        let status = self.status();
        (status, ApiError::to_error_response(self.code(), self.message())).into_response()
    }
}

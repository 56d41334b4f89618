//! Engine error taxonomy.
//!
//! Every refusal the engine can produce is a variant here, and every variant
//! maps to exactly one HTTP status and machine-readable code at the boundary.
//! A wrong flag is not an error anywhere in this taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum JuryError {
    /// No session, or the session token no longer resolves to an account.
    #[error("login required")]
    Unauthenticated,

    /// Authenticated, but the operation needs the admin role.
    #[error("admin privileges required")]
    Forbidden,

    /// The competition clock gate is closed for this caller. Carries the
    /// configured start instant so the caller can render a countdown.
    #[error("competition has not started")]
    CompetitionNotStarted { starts_at: Option<DateTime<Utc>> },

    /// The referenced task does not exist.
    #[error("no such task")]
    TaskNotFound,

    /// A category still referenced by tasks was targeted for deletion, or a
    /// task referenced a category that does not exist.
    #[error("category is referenced by existing tasks")]
    ReferentialViolation,

    /// Malformed or unacceptable request payload.
    #[error("invalid request: {0}")]
    BadRequest(&'static str),

    /// Unexpected storage failure. Never swallowed, always surfaced.
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for JuryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ReferentialViolation(_) => JuryError::ReferentialViolation,
            other => JuryError::Storage(other),
        }
    }
}

/// JSON body attached to every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    starts_at: Option<DateTime<Utc>>,
}

impl JuryError {
    /// Stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            JuryError::Unauthenticated => "login_required",
            JuryError::Forbidden => "admin_required",
            JuryError::CompetitionNotStarted { .. } => "not_started",
            JuryError::TaskNotFound => "task_not_found",
            JuryError::ReferentialViolation => "category_in_use",
            JuryError::BadRequest(code) => *code,
            JuryError::Storage(_) => "storage_failure",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            JuryError::Unauthenticated => StatusCode::UNAUTHORIZED,
            JuryError::Forbidden => StatusCode::FORBIDDEN,
            JuryError::CompetitionNotStarted { .. } => StatusCode::FORBIDDEN,
            JuryError::TaskNotFound => StatusCode::NOT_FOUND,
            JuryError::ReferentialViolation => StatusCode::CONFLICT,
            JuryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            JuryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for JuryError {
    fn into_response(self) -> Response {
        if let JuryError::Storage(err) = &self {
            tracing::error!("storage failure surfaced to caller: {err}");
        }
        let starts_at = match &self {
            JuryError::CompetitionNotStarted { starts_at } => *starts_at,
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            starts_at,
        };
        (self.status(), Json(body)).into_response()
    }
}

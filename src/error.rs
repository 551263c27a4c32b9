// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // Exam session preconditions (client-caused)
    ExamNotFound(i64),
    ExamNotYetOpen { exam_id: i64, opens_at: DateTime<Utc> },
    ExamClosed { exam_id: i64, closed_at: DateTime<Utc> },
    SessionAlreadyActive { exam_id: i64 },
    NoActiveSession { exam_id: i64 },
    ExamTimeExceeded { elapsed_secs: i64, allowed_secs: i64 },
    AlreadySubmitted { exam_id: i64 },
    CertificateNotEligible(String),
    RankPending { result_id: i64 },

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict on a concurrent write, safe to retry
    WriteConflict(String),

    // 503 Store unreachable, safe to retry
    StorageUnavailable(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl AppError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ExamNotFound(_) => "EXAM_NOT_FOUND",
            AppError::ExamNotYetOpen { .. } => "EXAM_NOT_YET_OPEN",
            AppError::ExamClosed { .. } => "EXAM_CLOSED",
            AppError::SessionAlreadyActive { .. } => "SESSION_ALREADY_ACTIVE",
            AppError::NoActiveSession { .. } => "NO_ACTIVE_SESSION",
            AppError::ExamTimeExceeded { .. } => "EXAM_TIME_EXCEEDED",
            AppError::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
            AppError::CertificateNotEligible(_) => "CERTIFICATE_NOT_ELIGIBLE",
            AppError::RankPending { .. } => "RANK_PENDING",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::AuthError(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::WriteConflict(_) => "WRITE_CONFLICT",
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ExamNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExamNotYetOpen { .. }
            | AppError::ExamClosed { .. }
            | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::SessionAlreadyActive { .. }
            | AppError::NoActiveSession { .. }
            | AppError::AlreadySubmitted { .. }
            | AppError::RankPending { .. }
            | AppError::WriteConflict(_) => StatusCode::CONFLICT,
            AppError::ExamTimeExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CertificateNotEligible(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::WriteConflict(_)
                | AppError::StorageUnavailable(_)
                | AppError::RankPending { .. }
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ExamNotFound(id) => write!(f, "Exam {} not found", id),
            AppError::ExamNotYetOpen { opens_at, .. } => {
                write!(f, "Exam has not started yet (opens at {})", opens_at.to_rfc3339())
            }
            AppError::ExamClosed { closed_at, .. } => {
                write!(f, "Exam has ended (closed at {})", closed_at.to_rfc3339())
            }
            AppError::SessionAlreadyActive { .. } => write!(f, "Exam already in progress"),
            AppError::NoActiveSession { .. } => write!(f, "No active exam session found"),
            AppError::ExamTimeExceeded {
                elapsed_secs,
                allowed_secs,
            } => write!(
                f,
                "Exam time exceeded ({}s elapsed, {}s allowed)",
                elapsed_secs, allowed_secs
            ),
            AppError::AlreadySubmitted { .. } => write!(f, "Exam already submitted"),
            AppError::RankPending { result_id } => {
                write!(f, "Result {} has not been ranked yet", result_id)
            }
            AppError::CertificateNotEligible(msg)
            | AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::WriteConflict(msg)
            | AppError::StorageUnavailable(msg)
            | AppError::InternalServerError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = if self.is_retryable() {
            Json(json!({
                "error": error_message,
                "code": self.code(),
                "retryable": true,
            }))
        } else {
            Json(json!({
                "error": error_message,
                "code": self.code(),
            }))
        };

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error`, separating transient store failures from real bugs.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::StorageUnavailable(err.to_string())
            }
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                AppError::WriteConflict(err.to_string())
            }
            _ => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

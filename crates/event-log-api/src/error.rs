//! The HTTP-facing error envelope, §7: "every error response is
//! `application/json` with `{ "severity": "error" | "info", "message":
//! "..." }`." This module only translates at the boundary — internal
//! code keeps propagating `EventLogError`.

use actix_web::{HttpResponse, ResponseError};
use event_log_types::EventLogError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Info,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub severity: Severity,
    pub message: String,
}

impl ErrorBody {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

/// §7 "Errors inside status-change updaters propagate to the HTTP
/// caller as 5xx"; everything else a caller can fix is a 4xx.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EventLogError> for ApiError {
    fn from(err: EventLogError) -> Self {
        match err {
            EventLogError::EventNotFound { .. } => ApiError::NotFound(err.to_string()),
            EventLogError::InvalidTransition { .. } | EventLogError::BadRequest { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            EventLogError::NoSubscriberAvailable => ApiError::ServiceUnavailable(err.to_string()),
            EventLogError::Database { .. }
            | EventLogError::Configuration { .. }
            | EventLogError::Serialization { .. }
            | EventLogError::SubscriberRequest { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::BadRequest(m) => HttpResponse::BadRequest().json(ErrorBody::error(m)),
            ApiError::NotFound(m) => HttpResponse::NotFound().json(ErrorBody::error(m)),
            ApiError::ServiceUnavailable(m) => HttpResponse::ServiceUnavailable().json(ErrorBody::error(m)),
            ApiError::Internal(m) => HttpResponse::InternalServerError().json(ErrorBody::error(m)),
        }
    }
}

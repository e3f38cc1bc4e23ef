//! Typed error handling for the policy pipeline and REST surface
//!
//! Every rejection the pipeline can produce has its own variant so that
//! callers (and HTTP clients) can tell them apart:
//!
//! - [`ApiError::AuthenticationRequired`]: no usable identity, the action needs one
//! - [`ApiError::AuthorizationDenied`]: identity present, a rule denies it
//! - [`ApiError::Throttled`]: working-hours gate or rate limiter rejected the request
//! - [`ApiError::NotFound`]: the persistence layer has no such resource
//! - [`ApiError::InvalidQuery`]: malformed pagination/ordering/filter value (strict mode)
//!
//! # Example
//!
//! ```rust,ignore
//! match pipeline.admit(Action::Update, &caller) {
//!     Ok(admission) => { /* proceed to persistence */ }
//!     Err(ApiError::Throttled { retry_after: Some(wait), .. }) => {
//!         println!("retry in {:?}", wait);
//!     }
//!     Err(e) => eprintln!("rejected: {}", e),
//! }
//! ```

use crate::core::throttle::RejectionKind;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use validator::ValidationErrors;

/// The error type returned by the pipeline and the REST handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication credentials were not provided or are invalid: {message}")]
    AuthenticationRequired { message: String },

    #[error("You do not have permission to perform this action: {message}")]
    AuthorizationDenied { message: String },

    #[error("Request was throttled by '{scope}' ({reason})")]
    Throttled {
        scope: String,
        reason: RejectionKind,
        retry_after: Option<Duration>,
    },

    #[error("{resource} with id '{id}' not found")]
    NotFound { resource: String, id: String },

    #[error("Invalid query parameter '{parameter}': {message}")]
    InvalidQuery { parameter: String, message: String },

    #[error("Invalid id format: '{value}'")]
    InvalidId { value: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        ApiError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            ApiError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            ApiError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidQuery { .. }
            | ApiError::InvalidId { .. }
            | ApiError::Validation(_)
            | ApiError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::AuthenticationRequired { .. } => "AUTHENTICATION_REQUIRED",
            ApiError::AuthorizationDenied { .. } => "PERMISSION_DENIED",
            ApiError::Throttled { .. } => "THROTTLED",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::InvalidQuery { .. } => "INVALID_QUERY",
            ApiError::InvalidId { .. } => "INVALID_ID",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidBody { .. } => "INVALID_BODY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Retry hint carried by rate-limit rejections
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Convert to an error response
    ///
    /// Internal errors keep their detail out of the body.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        };
        ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Throttled {
                scope,
                reason,
                retry_after,
            } => Some(serde_json::json!({
                "scope": scope,
                "reason": reason,
                "retry_after_seconds": retry_after.map(retry_after_seconds),
            })),
            ApiError::NotFound { resource, id } => Some(serde_json::json!({
                "resource": resource,
                "id": id,
            })),
            ApiError::InvalidQuery { parameter, .. } => {
                Some(serde_json::json!({ "parameter": parameter }))
            }
            ApiError::Validation(errors) => serde_json::to_value(errors.field_errors())
                .ok()
                .map(|fields| serde_json::json!({ "fields": fields })),
            _ => None,
        }
    }
}

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Whole seconds, rounded up, as sent in the `Retry-After` header
pub fn retry_after_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 { secs + 1 } else { secs }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = %detail, "internal error");
        }

        let status = self.status_code();
        let retry_after = self.retry_after();
        let mut response = (status, Json(self.to_response())).into_response();

        if let Some(wait) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds(wait).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidBody {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for pipeline and handler operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::AuthenticationRequired {
                message: "x".into()
            }
            .status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::AuthorizationDenied {
                message: "x".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::not_found("cat", "42").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidQuery {
                parameter: "page".into(),
                message: "bad".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_throttled_variants_are_distinguishable() {
        let gate = ApiError::Throttled {
            scope: "working_hours".into(),
            reason: RejectionKind::OutsideWorkingHours,
            retry_after: None,
        };
        let rate = ApiError::Throttled {
            scope: "low_request".into(),
            reason: RejectionKind::RateExceeded,
            retry_after: Some(Duration::from_millis(59_500)),
        };

        assert_eq!(gate.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rate.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let gate_details = gate.to_response().details.unwrap();
        let rate_details = rate.to_response().details.unwrap();
        assert_eq!(gate_details["reason"], "outside_working_hours");
        assert!(gate_details["retry_after_seconds"].is_null());
        assert_eq!(rate_details["reason"], "rate_exceeded");
        assert_eq!(rate_details["retry_after_seconds"], 60);
    }

    #[test]
    fn test_retry_after_seconds_rounds_up() {
        assert_eq!(retry_after_seconds(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_seconds(Duration::from_millis(2_001)), 3);
        assert_eq!(retry_after_seconds(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_into_response_sets_retry_after_header() {
        let err = ApiError::Throttled {
            scope: "low_request".into(),
            reason: RejectionKind::RateExceeded,
            retry_after: Some(Duration::from_secs(42)),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_from_anyhow_is_internal() {
        let err: ApiError = anyhow::anyhow!("lock poisoned").into();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("lock poisoned"));

        let body = err.to_response();
        assert_eq!(body.message, "Internal server error");
        assert!(!body.message.contains("lock poisoned"));
    }
}

//! # Error Handling
//!
//! Engine-level error taxonomy plus the unified problem+json response
//! format used by the operator API, with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Errors surfaced by the sync engine when talking to the marketplace
/// platform or operating on stored state.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The platform rejected the call because the access token is stale.
    /// Recoverable: refresh and retry once.
    #[error("marketplace rejected the access token as expired")]
    AuthExpired,

    /// Refresh is no longer possible; the merchant must re-authorize.
    /// Terminal until operator intervention.
    #[error("credential requires merchant re-authorization: {reason}")]
    ReauthRequired { reason: String },

    /// Network-level failure before a usable response was obtained.
    #[error("transport error calling marketplace: {0}")]
    Transport(#[from] reqwest::Error),

    /// The platform throttled the call.
    #[error("marketplace rate limited the call (retry after {retry_after_seconds:?}s)")]
    RateLimited { retry_after_seconds: Option<u64> },

    /// A request or payload failed local validation before any call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The platform returned a non-auth business or server error.
    #[error("marketplace error (code {code:?}): {message}")]
    Platform {
        code: Option<String>,
        message: String,
    },

    /// Persistence failure.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// Encryption or decryption of stored credentials failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl MarketError {
    /// Whether a failed job carrying this error should be retried by the
    /// queue (subject to max attempts) rather than failed permanently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::Transport(_)
                | MarketError::RateLimited { .. }
                | MarketError::Platform { .. }
                | MarketError::Db(_)
        )
    }

    /// Suggested minimum delay before retrying, if the platform provided one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            MarketError::RateLimited {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Stable machine code for persistence in job error columns.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::AuthExpired => "AUTH_EXPIRED",
            MarketError::ReauthRequired { .. } => "REAUTH_REQUIRED",
            MarketError::Transport(_) => "TRANSPORT",
            MarketError::RateLimited { .. } => "RATE_LIMITED",
            MarketError::Validation(_) => "VALIDATION",
            MarketError::Platform { .. } => "PLATFORM",
            MarketError::Db(_) => "DB",
            MarketError::Crypto(_) => "CRYPTO",
        }
    }

    /// Structured representation for the sync_jobs error column.
    pub fn to_job_error(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "retry_after": self.retry_after_seconds(),
        })
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to
    /// a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Detect a unique constraint violation across the supported backends.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(error: MarketError) -> Self {
        match &error {
            MarketError::AuthExpired | MarketError::ReauthRequired { .. } => Self::new(
                StatusCode::CONFLICT,
                "REAUTH_REQUIRED",
                &error.to_string(),
            ),
            MarketError::RateLimited {
                retry_after_seconds,
            } => {
                let api = Self::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    "Marketplace rate limit hit",
                );
                match retry_after_seconds {
                    Some(seconds) => api.with_retry_after(*seconds),
                    None => api,
                }
            }
            MarketError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            MarketError::Transport(_) | MarketError::Platform { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "PLATFORM_ERROR",
                &error.to_string(),
            ),
            MarketError::Db(db_err) => {
                tracing::error!("Database error: {:?}", db_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            MarketError::Crypto(message) => {
                tracing::error!("Crypto error: {}", message);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn retryable_classification() {
        assert!(
            MarketError::RateLimited {
                retry_after_seconds: Some(30)
            }
            .is_retryable()
        );
        assert!(
            MarketError::Platform {
                code: Some("500".into()),
                message: "internal".into()
            }
            .is_retryable()
        );
        assert!(!MarketError::AuthExpired.is_retryable());
        assert!(
            !MarketError::ReauthRequired {
                reason: "invalid_grant".into()
            }
            .is_retryable()
        );
        assert!(!MarketError::Validation("empty batch".into()).is_retryable());
    }

    #[test]
    fn retry_after_passthrough() {
        let err = MarketError::RateLimited {
            retry_after_seconds: Some(42),
        };
        assert_eq!(err.retry_after_seconds(), Some(42));
        assert_eq!(MarketError::AuthExpired.retry_after_seconds(), None);
    }

    #[test]
    fn job_error_column_shape() {
        let err = MarketError::Platform {
            code: Some("isv.permission-denied".into()),
            message: "no access".into(),
        };
        let value = err.to_job_error();
        assert_eq!(value["code"], "PLATFORM");
        assert!(value["message"].as_str().unwrap().contains("no access"));
    }

    #[test]
    fn reauth_maps_to_conflict() {
        let api: ApiError = MarketError::ReauthRequired {
            reason: "refresh token revoked".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, Box::from("REAUTH_REQUIRED"));
    }

    #[test]
    fn rate_limit_maps_with_retry_after_header() {
        let api: ApiError = MarketError::RateLimited {
            retry_after_seconds: Some(60),
        }
        .into();
        assert_eq!(api.status, StatusCode::TOO_MANY_REQUESTS);

        let response = api.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn database_error_mapping() {
        let db_error = sea_orm::DbErr::RecordNotFound("account".to_string());
        let api_error: ApiError = db_error.into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
        assert!(api_error.message.contains("account"));
    }

    #[test]
    fn validation_error_with_details() {
        let field_errors = json!({"action_kind": "unknown kind"});
        let error = validation_error("Validation failed", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }

    #[test]
    fn status_code_preserved_in_response() {
        let error = ApiError::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

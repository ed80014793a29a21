use std::collections::HashMap;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An outbound HTTP call failed or timed out.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The object store answered with an unexpected status or body.
    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    /// A validation error on a single request field.
    #[error("Validation error on {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// No unexpired session matches the code.
    #[error("Resource not found")]
    NotFound,

    /// The client used up its budget for the current window.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The client IP is on the denylist.
    #[error("IP address blocked")]
    Blocked,

    /// The shared-secret header is absent or wrong.
    #[error("Invalid access key")]
    Forbidden,

    /// A malformed request outside the exchange validation rules.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Required external configuration is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    /// The HTTP status this error is surfaced as.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::Blocked | AppError::Forbidden => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Redis(_)
            | AppError::Network(_)
            | AppError::ObjectStorage(_)
            | AppError::Configuration(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<HashMap<&'static str, Vec<String>>>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ErrorBody {
    fn new(error: Option<&'static str>, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            errors: None,
            retry_after: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                ErrorBody::new(None, "session store error")
            }

            AppError::Network(ref e) => {
                tracing::error!("Network error (timeout: {}): {}", e.is_timeout(), e);
                ErrorBody::new(None, "upstream service unreachable")
            }

            AppError::ObjectStorage(ref msg) => {
                tracing::error!("Object storage error: {}", msg);
                ErrorBody::new(None, "object storage error")
            }

            AppError::Validation { field, ref message } => {
                tracing::debug!("Validation error on {}: {}", field, message);
                let mut errors = HashMap::new();
                errors.insert(field, vec![message.clone()]);
                ErrorBody {
                    error: None,
                    message: format!("Validation Error || '{}' keyword went missing", field),
                    errors: Some(errors),
                    retry_after: None,
                }
            }

            AppError::NotFound => {
                tracing::debug!("No session for the supplied code");
                ErrorBody::new(
                    None,
                    "your code doesn't match any content, or the session expired",
                )
            }

            AppError::RateLimited { retry_after_secs } => {
                tracing::info!("Rate limit exceeded, retry after {}s", retry_after_secs);
                ErrorBody {
                    error: Some("Too many requests"),
                    message: "Please wait a few minutes before trying again".to_string(),
                    errors: None,
                    retry_after: Some(retry_after_secs),
                }
            }

            AppError::Blocked => ErrorBody::new(
                Some("Access Forbidden"),
                "Your IP address has been permanently blocked due to security violations.",
            ),

            AppError::Forbidden => {
                tracing::info!("Rejected request with an invalid access key");
                ErrorBody::new(Some("Forbidden"), "Invalid Access Key")
            }

            AppError::BadRequest(ref msg) => {
                tracing::debug!("Bad request: {}", msg);
                ErrorBody::new(None, msg.clone())
            }

            AppError::Configuration(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                ErrorBody::new(None, format!("{} is not configured", msg))
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                ErrorBody::new(None, "Internal server error")
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorBody::new(None, "Internal server error")
            }
        };

        let retry_after = body.retry_after;
        let json = sonic_rs::to_string(&body)
            .unwrap_or_else(|_| r#"{"message":"Internal server error"}"#.to_string());

        let mut response = (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            json,
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

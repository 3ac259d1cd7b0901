/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub const MISSING_TOKEN_MESSAGE: &str =
    "API token not configured. Please set AUTERION_API_TOKEN environment variable.";
const UNREACHABLE_MESSAGE: &str = "Unable to reach the fleet API. Please try again later";
const INTERNAL_MESSAGE: &str = "Internal server error occurred";

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream rejected request with status {status}: {message}")]
    UpstreamRejected { status: u16, message: String },
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn missing_token() -> Self {
        ApiError::Configuration(MISSING_TOKEN_MESSAGE.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            ApiError::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UpstreamRejected { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::UpstreamUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Message safe to hand back to the caller
    fn public_message(&self) -> String {
        match self {
            ApiError::Configuration(msg)
            | ApiError::InvalidInput(msg)
            | ApiError::NotFound(msg) => msg.clone(),
            ApiError::UpstreamRejected { message, .. } => message.clone(),
            ApiError::UpstreamUnreachable(_) => UNREACHABLE_MESSAGE.to_string(),
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ApiError::UpstreamUnreachable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::UpstreamUnreachable(_) | ApiError::Internal(_) => {
                error!(error = %self, "request failed");
            }
            ApiError::UpstreamRejected { status, message } => {
                error!(status, message = %message, "upstream rejected request");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_is_500() {
        assert_eq!(
            ApiError::missing_token().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_status_is_forwarded() {
        let err = ApiError::UpstreamRejected {
            status: 401,
            message: "bad key".to_string(),
        };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), "bad key");
    }

    #[test]
    fn test_upstream_success_status_maps_to_bad_gateway() {
        let err = ApiError::UpstreamRejected {
            status: 302,
            message: "moved".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unreachable_hides_cause() {
        let err = ApiError::UpstreamUnreachable("dns failure for 10.0.0.1".to_string());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("10.0.0.1"));
    }

    #[test]
    fn test_internal_hides_cause() {
        let err = ApiError::Internal("secret detail".to_string());
        assert_eq!(err.public_message(), INTERNAL_MESSAGE);
    }
}

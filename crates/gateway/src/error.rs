use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::messages::anthropic::ErrorResponse;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors, each mapping to an Anthropic error kind and an HTTP
/// status code.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The inbound request failed validation or the upstream rejected it
    /// as malformed.
    #[error("{0}")]
    InvalidRequest(String),

    /// Missing or invalid credentials.
    #[error("{0}")]
    AuthenticationFailed(String),

    /// Credentials are valid but do not allow the operation.
    #[error("{0}")]
    PermissionDenied(String),

    /// Unknown model or endpoint at the upstream.
    #[error("{0}")]
    NotFound(String),

    /// The upstream rate limited the request. Never retried.
    #[error("{message}")]
    RateLimitExceeded {
        /// Upstream-provided message.
        message: String,
    },

    /// The upstream is overloaded.
    #[error("{0}")]
    Overloaded(String),

    /// Upstream returned a status this gateway has no dedicated mapping
    /// for; the original status is preserved for 4xx.
    #[error("upstream error ({status}): {message}")]
    UpstreamApiError {
        /// Original upstream HTTP status.
        status: u16,
        /// Upstream-provided message.
        message: String,
    },

    /// Transport-level failure talking to the upstream.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Internal gateway failure. `Some(message)` came from the upstream
    /// and can be shown; `None` must not leak details.
    #[error("internal server error")]
    Internal(Option<String>),
}

impl GatewayError {
    /// The HTTP status code surfaced to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Overloaded(_) => StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            Self::UpstreamApiError { status, .. } => match *status {
                400..=499 => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The Anthropic error kind for the envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::PermissionDenied(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::Overloaded(_) => "overloaded_error",
            Self::UpstreamApiError { status, .. } if (400..500).contains(status) => "invalid_request_error",
            Self::UpstreamApiError { .. } | Self::ConnectionError(_) | Self::Internal(_) => "api_error",
        }
    }

    /// Whether a configured fallback upstream may be tried.
    ///
    /// Only server-side (5xx) and transport errors qualify; client errors
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError(_) | Self::Overloaded(_) => true,
            Self::UpstreamApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Message safe to expose to the caller.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(upstream_message)) => upstream_message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Map an upstream HTTP status and extracted message to an error.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimitExceeded { message },
            529 => Self::Overloaded(message),
            _ => Self::UpstreamApiError { status, message },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(self.error_type(), self.client_message());

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_429_preserves_status_and_kind() {
        let error = GatewayError::from_upstream_status(429, "slow down".to_string());

        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.error_type(), "rate_limit_error");
        assert_eq!(error.client_message(), "slow down");
        assert!(!error.is_retryable());
    }

    #[test]
    fn unmapped_4xx_keeps_status_but_maps_to_invalid_request() {
        let error = GatewayError::from_upstream_status(422, "bad shape".to_string());

        assert_eq!(error.status_code().as_u16(), 422);
        assert_eq!(error.error_type(), "invalid_request_error");
        assert!(!error.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable_and_become_502() {
        let error = GatewayError::from_upstream_status(503, "down".to_string());

        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(error.error_type(), "api_error");
        assert!(error.is_retryable());

        assert!(GatewayError::ConnectionError("refused".to_string()).is_retryable());
    }

    #[test]
    fn overloaded_maps_to_529() {
        let error = GatewayError::from_upstream_status(529, "overloaded".to_string());

        assert_eq!(error.status_code().as_u16(), 529);
        assert_eq!(error.error_type(), "overloaded_error");
        assert!(error.is_retryable());
    }

    #[test]
    fn envelope_shape_for_upstream_429() {
        let error = GatewayError::from_upstream_status(429, "slow down".to_string());
        let body = ErrorResponse::new(error.error_type(), error.client_message());

        insta::assert_json_snapshot!(body, @r#"
        {
          "type": "error",
          "error": {
            "type": "rate_limit_error",
            "message": "slow down"
          }
        }
        "#);
    }

    #[test]
    fn internal_error_without_message_does_not_leak() {
        let error = GatewayError::Internal(None);
        assert_eq!(error.client_message(), "Internal server error");

        let error = GatewayError::Internal(Some("upstream exploded".to_string()));
        assert_eq!(error.client_message(), "upstream exploded");
    }
}

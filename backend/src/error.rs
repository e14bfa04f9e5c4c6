//! Client-facing error taxonomy for the chat gateway.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use quizchat_common::ResponseEnvelope;

use crate::config::Mode;
use crate::llm::UpstreamError;
use crate::runner::RunError;

/// Kind of failure, as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    RateLimited,
    Timeout,
    UpstreamFailure,
    InternalError,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamFailure | ErrorKind::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests from this IP, please try again later.";
pub const TIMEOUT_MESSAGE: &str = "Request timeout - the AI service took too long to respond. Please try again.";
pub const REJECTED_MESSAGE: &str = "Invalid request format. Please rephrase your question.";
pub const INTERNAL_MESSAGE: &str = "Failed to get a response from the AI service. Please try again later.";

/// Errors returned by the chat gateway.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The client payload failed validation. The message is shown to the client.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Upstream call exceeded the {0:?} deadline")]
    Timeout(Duration),

    #[error(transparent)]
    Upstream(UpstreamError),

    /// Server-side fault the client cannot fix, such as a rejected API key.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthorized { .. } => ApiError::Internal(err.to_string()),
            other => ApiError::Upstream(other),
        }
    }
}

impl From<RunError<UpstreamError>> for ApiError {
    fn from(err: RunError<UpstreamError>) -> Self {
        match err {
            RunError::TimedOut(deadline) => ApiError::Timeout(deadline),
            RunError::Failed(e) => e.into(),
        }
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidInput(_) => ErrorKind::InvalidInput,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::Upstream(UpstreamError::Rejected { .. }) => ErrorKind::InvalidInput,
            ApiError::Upstream(UpstreamError::Cancelled) => ErrorKind::Timeout,
            ApiError::Upstream(_) => ErrorKind::UpstreamFailure,
            ApiError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// Message safe to show to any client.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::InvalidInput(message) => message.clone(),
            ApiError::RateLimited { .. } => RATE_LIMITED_MESSAGE.to_string(),
            ApiError::Upstream(UpstreamError::Rejected { .. }) => REJECTED_MESSAGE.to_string(),
            ApiError::Timeout(_) | ApiError::Upstream(UpstreamError::Cancelled) => {
                TIMEOUT_MESSAGE.to_string()
            }
            ApiError::Upstream(_) | ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }

    /// Internal detail, only for 5xx failures and only in development mode.
    pub fn details(&self, mode: Mode) -> Option<String> {
        let internal = matches!(
            self.kind(),
            ErrorKind::UpstreamFailure | ErrorKind::InternalError
        );
        (internal && mode.exposes_details()).then(|| self.to_string())
    }

    /// Log the error and render the JSON envelope.
    pub fn into_response_for(self, mode: Mode) -> Response {
        let kind = self.kind();
        let status = kind.status();

        if status.is_server_error() {
            tracing::error!(kind = kind.as_str(), status = status.as_u16(), error = %self, "Chat request failed");
        } else {
            tracing::warn!(kind = kind.as_str(), status = status.as_u16(), error = %self, "Chat request rejected");
        }

        let envelope = ResponseEnvelope::failure(self.public_message(), self.details(mode));
        let mut response = (status, Json(envelope)).into_response();

        if let ApiError::RateLimited { retry_after } = self {
            // Round up so clients never retry early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_error() -> ApiError {
        ApiError::Upstream(UpstreamError::Provider {
            status: 500,
            message: "backend exploded at line 42".to_string(),
        })
    }

    #[test]
    fn test_kind_to_status() {
        assert_eq!(
            ApiError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: Duration::from_secs(1) }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Timeout(Duration::from_secs(15)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(provider_error().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_rejection_is_invalid_input() {
        let err = ApiError::from(UpstreamError::Rejected {
            status: 400,
            message: "Request contains an invalid argument.".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.public_message(), REJECTED_MESSAGE);
        assert!(err.details(Mode::Development).is_none());
    }

    #[test]
    fn test_refused_credentials_are_internal() {
        let err: ApiError = RunError::Failed(UpstreamError::Unauthorized {
            status: 400,
            message: "API key not valid".to_string(),
        })
        .into();

        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), INTERNAL_MESSAGE);
        assert!(err.details(Mode::Production).is_none());
        assert!(err
            .details(Mode::Development)
            .unwrap()
            .contains("API key not valid"));
    }

    #[test]
    fn test_run_error_conversion() {
        let timed_out: ApiError = RunError::<UpstreamError>::TimedOut(Duration::from_secs(15)).into();
        assert_eq!(timed_out.kind(), ErrorKind::Timeout);

        let failed: ApiError =
            RunError::Failed(UpstreamError::InvalidResponse("empty".into())).into();
        assert_eq!(failed.kind(), ErrorKind::UpstreamFailure);
    }

    #[test]
    fn test_details_only_in_development() {
        let err = provider_error();
        assert!(err.details(Mode::Production).is_none());
        let details = err.details(Mode::Development).unwrap();
        assert!(details.contains("backend exploded"));
        assert!(!err.public_message().contains("backend exploded"));
    }

    #[test]
    fn test_timeout_never_has_details() {
        let err = ApiError::Timeout(Duration::from_secs(15));
        assert!(err.details(Mode::Development).is_none());
        assert_eq!(err.public_message(), TIMEOUT_MESSAGE);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into_response_for(Mode::Production);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}

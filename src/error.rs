//! Error types for dashboard API calls and the session layer
//!
//! Errors are classified by recoverability:
//! - Retryable: transport failures, timeouts, rate limits, server errors
//! - NonRetryable: bad requests, malformed payloads, configuration
//! - RequiresUserAction: missing or revoked session (log in again)

use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed token refresh, fanned out to every queued waiter.
///
/// Kept `Clone` (unlike `ApiError`, which wraps `reqwest::Error`) so a single
/// refresh failure can be delivered to any number of continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl RefreshFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The refresh endpoint rejected the session itself (401/403).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<&ApiError> for RefreshFailure {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::RefreshFailed(failure) => failure.clone(),
            other => RefreshFailure::new(other.status(), other.to_string()),
        }
    }
}

/// Crate-wide error for HTTP calls, session handling and polled producers.
#[derive(Debug, Error)]
pub enum ApiError {
    // Transport
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // Response status
    #[error("API error {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Token refresh failed: {0}")]
    RefreshFailed(RefreshFailure),

    #[error("Not authenticated")]
    NotAuthenticated,

    // Local
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::RefreshFailed(failure) => failure.status,
            ApiError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http(err) => err.is_timeout() || err.is_connect(),
            ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        match self {
            ApiError::Unauthorized { .. } | ApiError::NotAuthenticated => true,
            ApiError::RefreshFailed(failure) => failure.is_auth_failure(),
            _ => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ApiError::Http(_) => "Check your network connection and try again.",
            ApiError::Timeout(_) => "The server took too long to respond. Try again.",
            ApiError::Status { status, .. } if *status == 429 => {
                "Too many requests. Wait a moment and try again."
            }
            ApiError::Status { status, .. } if *status >= 500 => {
                "The dashboard service is having trouble. Try again shortly."
            }
            ApiError::Status { .. } => "The request was rejected. Check the filters and try again.",
            ApiError::Unauthorized { .. } | ApiError::NotAuthenticated => {
                "Your session has ended. Sign in again."
            }
            ApiError::RefreshFailed(_) => "Could not renew your session. Sign in again.",
            ApiError::Io(_) => "Check file permissions and disk space.",
            ApiError::Json(_) => "The server returned an unexpected response.",
            ApiError::InvalidUrl(_) | ApiError::Config(_) => {
                "Check your configuration in ~/.manobal/config.json"
            }
            ApiError::Cancelled => "The operation was cancelled.",
        }
    }

    fn error_type(&self) -> ErrorType {
        if self.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if self.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        }
    }
}

/// Coarse error kind, matching the three failure families a consumer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// No response was obtained.
    Transport,
    /// A response arrived with a failing status.
    Status,
    /// The session could not be refreshed or is missing.
    Auth,
    /// Anything local: decoding, IO, configuration, cancellation.
    Internal,
}

impl From<&ApiError> for ErrorKind {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Http(e) if e.status().is_none() => ErrorKind::Transport,
            ApiError::Http(_) | ApiError::Status { .. } => ErrorKind::Status,
            ApiError::Timeout(_) => ErrorKind::Transport,
            ApiError::Unauthorized { .. }
            | ApiError::RefreshFailed(_)
            | ApiError::NotAuthenticated => ErrorKind::Auth,
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

/// Serializable error snapshot kept in a `FetchState`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub message: String,
    pub kind: ErrorKind,
    pub error_type: ErrorType,
    pub status: Option<u16>,
    pub detail: Option<serde_json::Value>,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl ErrorInfo {
    /// Error info for a producer that panicked instead of returning.
    pub fn panicked(message: impl Into<String>) -> Self {
        ErrorInfo {
            message: message.into(),
            kind: ErrorKind::Internal,
            error_type: ErrorType::NonRetryable,
            status: None,
            detail: None,
            can_retry: false,
            recovery_suggestion: "Reload the view.".to_string(),
        }
    }
}

impl From<&ApiError> for ErrorInfo {
    fn from(err: &ApiError) -> Self {
        let detail = match err {
            ApiError::Status { body, .. } => body.clone(),
            _ => None,
        };

        ErrorInfo {
            message: err.to_string(),
            kind: ErrorKind::from(err),
            error_type: err.error_type(),
            status: err.status(),
            detail,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

impl From<ApiError> for ErrorInfo {
    fn from(err: ApiError) -> Self {
        ErrorInfo::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server = ApiError::Status {
            status: 503,
            message: "unavailable".into(),
            body: None,
        };
        assert!(server.is_retryable());
        assert!(!server.requires_user_action());

        let bad_request = ApiError::Status {
            status: 400,
            message: "bad".into(),
            body: None,
        };
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.status(), Some(400));
    }

    #[test]
    fn test_refresh_auth_failure_requires_user_action() {
        let revoked = ApiError::RefreshFailed(RefreshFailure::new(Some(401), "revoked"));
        assert!(revoked.requires_user_action());

        let flaky = ApiError::RefreshFailed(RefreshFailure::new(Some(502), "bad gateway"));
        assert!(!flaky.requires_user_action());
    }

    #[test]
    fn test_error_info_carries_status_detail() {
        let err = ApiError::Status {
            status: 404,
            message: "Department 'Ops' not found".into(),
            body: Some(serde_json::json!({"error": "NOT_FOUND"})),
        };
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::Status);
        assert_eq!(info.status, Some(404));
        assert_eq!(info.error_type, ErrorType::NonRetryable);
        assert_eq!(info.detail, Some(serde_json::json!({"error": "NOT_FOUND"})));
        assert!(info.message.contains("Department 'Ops' not found"));
    }

    #[test]
    fn test_refresh_failure_roundtrip_through_api_error() {
        let failure = RefreshFailure::new(Some(500), "boom");
        let err = ApiError::RefreshFailed(failure.clone());
        assert_eq!(RefreshFailure::from(&err), failure);
        assert_eq!(ErrorInfo::from(&err).kind, ErrorKind::Auth);
    }

    #[test]
    fn test_error_info_serializes_camel_case() {
        let info = ErrorInfo::from(ApiError::NotAuthenticated);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["errorType"], "requiresuseraction");
        assert_eq!(json["kind"], "auth");
        assert_eq!(json["canRetry"], false);
    }
}

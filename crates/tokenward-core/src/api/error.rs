use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the login, request and decode paths.
///
/// A refresh failure never shows up here: it ends the session through the
/// expiry handler, and the caller sees the original 401 response.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Login rejected ({status}): {body}")]
    LoginRejected { status: StatusCode, body: String },

    /// A 401 that survived the refresh-and-retry; the session has ended
    #[error("Session expired - log in again")]
    SessionExpired,

    #[error("Access denied for this role: {0}")]
    AccessDenied(String),

    #[error("Request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Error for a non-2xx response from an authenticated request
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::SessionExpired,
            StatusCode::FORBIDDEN => ApiError::AccessDenied(Self::truncate_body(body)),
            _ => ApiError::Status {
                status,
                body: Self::truncate_body(body),
            },
        }
    }

    /// Error for a non-2xx answer from the login endpoint
    pub fn login_rejected(status: StatusCode, body: &str) -> Self {
        ApiError::LoginRejected {
            status,
            body: Self::truncate_body(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_session_outcomes() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, "expired"), ApiError::SessionExpired));
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, "no"), ApiError::AccessDenied(b) if b == "no"));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "down"),
            ApiError::Status { status: StatusCode::BAD_GATEWAY, body } if body == "down"
        ));
    }

    #[test]
    fn test_login_rejected_keeps_status() {
        let err = ApiError::login_rejected(StatusCode::BAD_REQUEST, "bad credentials");
        assert_eq!(err.to_string(), "Login rejected (400 Bad Request): bad credentials");
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::Status { body: message, .. } => {
                assert!(message.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
                assert!(message.ends_with("(truncated, 520 total bytes)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let body = "ы".repeat(MAX_ERROR_BODY_LENGTH);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }
}

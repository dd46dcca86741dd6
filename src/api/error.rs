use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a token refresh did not produce a new access token.
///
/// Cloned to every caller queued behind the refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("refresh rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("refresh response missing access_token")]
    MissingAccessToken,

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A raw 401 that the refresh protocol can recover from
    AuthRetryable,
    /// The session is gone; the user must log in again
    SessionTerminal,
    /// Hand to the caller unchanged
    PassThrough,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed ({status}): {message}")]
    Backend {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Cannot refresh session: {0}")]
    RefreshUnavailable(&'static str),

    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshFailure),

    #[error("Timed out waiting for token refresh")]
    RefreshTimeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}

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
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    /// Build a backend failure from a non-2xx response.
    ///
    /// Keeps the structured body when it is JSON and uses its `message` field
    /// when present; otherwise falls back to a generic description.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(body);
                if text.trim().is_empty() {
                    format!("HTTP {}", status)
                } else {
                    Self::truncate_body(text.trim())
                }
            });
        ApiError::Backend {
            status,
            message,
            body: parsed,
        }
    }

    /// A refresh that timed out or was abandoned leaves the stored session
    /// in place, so only failures that purged it are terminal.
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Backend { status: 401, .. } => ErrorClass::AuthRetryable,
            ApiError::Refresh(RefreshFailure::Abandoned) | ApiError::RefreshTimeout => {
                ErrorClass::PassThrough
            }
            ApiError::SessionExpired | ApiError::RefreshUnavailable(_) | ApiError::Refresh(_) => {
                ErrorClass::SessionTerminal
            }
            _ => ErrorClass::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_uses_structured_message() {
        let err = ApiError::from_status(
            422,
            br#"{"message":"Email already registered","success":false,"statusCode":422}"#,
        );
        match err {
            ApiError::Backend {
                status,
                message,
                body,
            } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Email already registered");
                assert_eq!(body.unwrap()["statusCode"], 422);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_status_generic_fallback() {
        let err = ApiError::from_status(502, b"");
        assert_eq!(err.to_string(), "Request failed (502): HTTP 502");
        assert_eq!(err.class(), ErrorClass::PassThrough);

        let long = "x".repeat(2000);
        let err = ApiError::from_status(500, long.as_bytes());
        assert!(err.to_string().contains("truncated, 2000 total bytes"));
    }

    #[test]
    fn test_classification() {
        assert_eq!(ApiError::from_status(401, b"").class(), ErrorClass::AuthRetryable);
        assert_eq!(ApiError::SessionExpired.class(), ErrorClass::SessionTerminal);
        assert_eq!(
            ApiError::from(RefreshFailure::MissingAccessToken).class(),
            ErrorClass::SessionTerminal
        );
        assert_eq!(
            ApiError::Network("connection refused".into()).class(),
            ErrorClass::PassThrough
        );
    }

    #[test]
    fn test_unsettled_refresh_is_not_terminal() {
        assert_eq!(ApiError::RefreshTimeout.class(), ErrorClass::PassThrough);
        assert_eq!(
            ApiError::from(RefreshFailure::Abandoned).class(),
            ErrorClass::PassThrough
        );
        assert_eq!(
            ApiError::from(RefreshFailure::Rejected {
                status: 403,
                message: "revoked".into()
            })
            .class(),
            ErrorClass::SessionTerminal
        );
    }
}

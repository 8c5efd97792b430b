//! Error types for the test API and the session lifecycle.
//!
//! `ApiError` is defined here rather than in the client crate so the session
//! controller can classify failures (terminal unauthorized vs. everything
//! else) without string matching.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the test-catalog/session API and the history collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The credential is missing, expired or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested session, result or test type does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Returns `true` if the caller must re-authenticate before trying again.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Errors surfaced by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The test type is still inside its cooldown window.
    #[error("test '{test_type}' is not available yet, try again in {remaining_seconds}s")]
    Ineligible {
        test_type: String,
        remaining_seconds: u64,
        cooldown_end: Option<DateTime<Utc>>,
    },

    /// The credential was rejected; re-authentication is required.
    #[error("authorization required: {0}")]
    Unauthorized(String),

    /// Requesting a new session failed.
    #[error("failed to start test '{test_type}': {source}")]
    Start {
        test_type: String,
        #[source]
        source: ApiError,
    },

    /// Submitting answers or fetching the result failed.
    #[error("failed to submit session {session_id}: {source}")]
    Submit {
        session_id: String,
        #[source]
        source: ApiError,
    },

    /// The session task ended without producing an outcome.
    #[error("session aborted: {0}")]
    Aborted(String),
}

impl SessionError {
    pub(crate) fn start(test_type: &str, source: ApiError) -> Self {
        match source {
            ApiError::Unauthorized(message) => SessionError::Unauthorized(message),
            source => SessionError::Start {
                test_type: test_type.to_string(),
                source,
            },
        }
    }

    pub(crate) fn submit(session_id: &str, source: ApiError) -> Self {
        match source {
            ApiError::Unauthorized(message) => SessionError::Unauthorized(message),
            source => SessionError::Submit {
                session_id: session_id.to_string(),
                source,
            },
        }
    }

    /// Remaining cooldown in seconds, if this is an ineligible-start error.
    pub fn remaining_seconds(&self) -> Option<u64> {
        match self {
            SessionError::Ineligible {
                remaining_seconds, ..
            } => Some(*remaining_seconds),
            _ => None,
        }
    }
}

/// Render a wait in seconds as `1h 05m`, `4m 10s` or `12s`.
pub fn format_wait(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_permanent() {
        assert!(ApiError::Unauthorized("expired".into()).is_permanent());
        assert!(!ApiError::Timeout(30).is_permanent());
        assert!(!ApiError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_permanent());
    }

    #[test]
    fn start_failure_classification() {
        let err = SessionError::start("memory", ApiError::Unauthorized("bad token".into()));
        assert!(matches!(err, SessionError::Unauthorized(_)));

        let err = SessionError::start("memory", ApiError::Network("refused".into()));
        assert!(matches!(err, SessionError::Start { .. }));
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn ineligible_message_includes_wait() {
        let err = SessionError::Ineligible {
            test_type: "reaction".into(),
            remaining_seconds: 3_900,
            cooldown_end: None,
        };
        assert_eq!(err.remaining_seconds(), Some(3_900));
        assert!(err.to_string().contains("3900s"), "got: {err}");
    }

    #[test]
    fn format_wait_units() {
        assert_eq!(format_wait(0), "0s");
        assert_eq!(format_wait(59), "59s");
        assert_eq!(format_wait(250), "4m 10s");
        assert_eq!(format_wait(86_400), "24h 00m");
    }
}

//! Collaborator traits consumed by the session engine.
//!
//! These async traits are implemented by the `cogcheck-client` crate (HTTP and
//! in-memory variants). The engine never owns transport, retries or storage.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::{
    AnswerMap, CooldownStatus, SessionTicket, SubmitSummary, TestHistoryEntry, TestResult,
};

// ---------------------------------------------------------------------------
// Test-catalog/session API
// ---------------------------------------------------------------------------

/// The remote test catalog: starts sessions, scores them, serves results.
#[async_trait]
pub trait TestApi: Send + Sync {
    /// Human-readable backend name (e.g. "http").
    fn name(&self) -> &str;

    /// Request a new session (question set and time limit) for a test type.
    async fn start_test(&self, test_type: &str) -> Result<SessionTicket, ApiError>;

    /// Submit the collected answers for scoring.
    async fn submit_test(
        &self,
        session_id: &str,
        answers: &AnswerMap,
    ) -> Result<SubmitSummary, ApiError>;

    /// Fetch the stored result, including mistakes.
    async fn get_result(&self, result_id: i64) -> Result<TestResult, ApiError>;

    /// Server-side cooldown decision for a test type.
    async fn get_cooldown(&self, test_type: &str) -> Result<CooldownStatus, ApiError>;
}

// ---------------------------------------------------------------------------
// History collaborator
// ---------------------------------------------------------------------------

/// Read-only access to the user's past results.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(&self) -> Result<Vec<TestHistoryEntry>, ApiError>;
}

// ---------------------------------------------------------------------------
// Auth collaborator
// ---------------------------------------------------------------------------

/// Supplies the access credential attached to API requests.
///
/// Injected into API clients at construction so tests can run against fakes.
pub trait CredentialSource: Send + Sync {
    /// Current bearer token, or `None` when the user is signed out.
    fn bearer_token(&self) -> Option<String>;
}

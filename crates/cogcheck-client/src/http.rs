//! HTTP implementation of the test API and history source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cogcheck_core::error::ApiError;
use cogcheck_core::model::{
    AnswerMap, CooldownStatus, SessionTicket, SubmitSummary, TestHistoryEntry, TestResult,
};
use cogcheck_core::traits::{CredentialSource, HistorySource, TestApi};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Test API client for the dashboard backend.
pub struct HttpTestApi {
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl std::fmt::Debug for HttpTestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTestApi")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Serialize)]
struct StartRequest<'a> {
    test_type: &'a str,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    test_id: &'a str,
    answers: &'a AnswerMap,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpTestApi {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, send, and map the response status.
    ///
    /// Without a token no request is made.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or_else(|| ApiError::Unauthorized("no access token, sign in first".into()))?;

        let response = request.bearer_auth(token).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout_secs)
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Unauthorized(error_message(body)));
        }
        if status == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::NotFound(error_message(body)));
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status,
                message: error_message(body),
            });
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

/// Prefer the backend's `message` or `error` field over the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or(body)
}

/// History rows store `details` as a JSON-encoded string; decode it in place.
fn decode_details(mut entry: TestHistoryEntry) -> TestHistoryEntry {
    if let serde_json::Value::String(raw) = &entry.details {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) {
            entry.details = parsed;
        }
    }
    entry
}

#[async_trait]
impl TestApi for HttpTestApi {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn start_test(&self, test_type: &str) -> Result<SessionTicket, ApiError> {
        let request = self
            .client
            .post(self.url("/tests/start"))
            .json(&StartRequest { test_type });
        self.send_json(request).await
    }

    #[instrument(skip(self, answers), fields(answered = answers.len()))]
    async fn submit_test(
        &self,
        session_id: &str,
        answers: &AnswerMap,
    ) -> Result<SubmitSummary, ApiError> {
        let request = self.client.post(self.url("/tests/submit")).json(&SubmitRequest {
            test_id: session_id,
            answers,
        });
        self.send_json(request).await
    }

    #[instrument(skip(self))]
    async fn get_result(&self, result_id: i64) -> Result<TestResult, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/tests/results/{result_id}")));
        self.send_json(request).await
    }

    #[instrument(skip(self))]
    async fn get_cooldown(&self, test_type: &str) -> Result<CooldownStatus, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/tests/cooldown/{test_type}")));
        self.send_json(request).await
    }
}

#[async_trait]
impl HistorySource for HttpTestApi {
    #[instrument(skip(self))]
    async fn history(&self) -> Result<Vec<TestHistoryEntry>, ApiError> {
        let request = self.client.get(self.url("/cognitive-tests"));
        let entries: Vec<TestHistoryEntry> = self.send_json(request).await?;
        Ok(entries.into_iter().map(decode_details).collect())
    }
}

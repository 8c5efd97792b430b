//! In-memory test API for tests and offline practice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cogcheck_core::cooldown::{CooldownPolicy, CooldownRecord};
use cogcheck_core::error::ApiError;
use cogcheck_core::model::{
    AnswerMap, CooldownStatus, SessionTicket, SubmitSummary, TestHistoryEntry, TestResult,
};
use cogcheck_core::parser::QuestionSet;
use cogcheck_core::scoring::{expected_answers, ScoringConfig, ScoringEngine};
use cogcheck_core::traits::{HistorySource, TestApi};

/// Serves question sets from memory, scores submissions locally and
/// enforces cooldowns the way the backend does.
pub struct MockTestApi {
    sets: HashMap<String, QuestionSet>,
    reveal_answers: bool,
    cooldowns: CooldownPolicy,
    scoring: ScoringEngine,
    start_calls: AtomicU32,
    submit_calls: AtomicU32,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    open: HashMap<String, OpenSession>,
    results: HashMap<i64, TestResult>,
    history: Vec<TestHistoryEntry>,
    next_result_id: i64,
    fail_start: Option<ApiError>,
    fail_submit: Option<ApiError>,
    fail_history: Option<ApiError>,
    last_submission: Option<(String, AnswerMap)>,
}

struct OpenSession {
    test_type: String,
    started_at: DateTime<Utc>,
}

impl MockTestApi {
    pub fn new(sets: impl IntoIterator<Item = QuestionSet>) -> Self {
        Self {
            sets: sets
                .into_iter()
                .map(|set| (set.test_type.clone(), set))
                .collect(),
            reveal_answers: false,
            cooldowns: CooldownPolicy::default(),
            scoring: ScoringEngine::default(),
            start_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            state: Mutex::new(MockState {
                next_result_id: 1,
                ..MockState::default()
            }),
        }
    }

    /// Send `correct_answer` with each question, enabling provisional scores.
    pub fn reveal_answers(mut self, reveal: bool) -> Self {
        self.reveal_answers = reveal;
        self
    }

    pub fn with_cooldowns(mut self, policy: CooldownPolicy) -> Self {
        self.cooldowns = policy;
        self
    }

    pub fn with_scoring(mut self, config: ScoringConfig) -> Self {
        self.scoring = ScoringEngine::new(config);
        self
    }

    /// Seed prior attempts; result ids continue after the largest seeded id.
    pub fn with_history(self, entries: Vec<TestHistoryEntry>) -> Self {
        {
            let mut state = self.lock();
            state.next_result_id = entries.iter().map(|e| e.test_id).max().unwrap_or(0) + 1;
            state.history = entries;
        }
        self
    }

    /// Fail the next `start_test` call with `error`.
    pub fn fail_next_start(&self, error: ApiError) {
        self.lock().fail_start = Some(error);
    }

    /// Fail the next `submit_test` call with `error`.
    pub fn fail_next_submit(&self, error: ApiError) {
        self.lock().fail_submit = Some(error);
    }

    /// Fail every history request with `error` until cleared with `None`.
    pub fn fail_history(&self, error: Option<ApiError>) {
        self.lock().fail_history = error;
    }

    pub fn test_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::Relaxed)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::Relaxed)
    }

    /// Sessions started but not yet submitted.
    pub fn open_sessions(&self) -> usize {
        self.lock().open.len()
    }

    /// Session id and answers of the most recent submission.
    pub fn last_submission(&self) -> Option<(String, AnswerMap)> {
        self.lock().last_submission.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown_record(&self, state: &MockState, test_type: &str) -> CooldownRecord {
        CooldownRecord::derive(test_type, &state.history, &self.cooldowns, Utc::now())
    }
}

#[async_trait]
impl TestApi for MockTestApi {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_test(&self, test_type: &str) -> Result<SessionTicket, ApiError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if let Some(error) = state.fail_start.take() {
            return Err(error);
        }

        let set = self
            .sets
            .get(test_type)
            .ok_or_else(|| ApiError::NotFound(format!("unknown test type: {test_type}")))?;

        if self.cooldown_record(&state, test_type).in_cooldown {
            return Err(ApiError::Http {
                status: 429,
                message: format!("test '{test_type}' is in cooldown"),
            });
        }

        // A new start supersedes any abandoned session of the same type.
        state.open.retain(|id, open| {
            let superseded = open.test_type == test_type;
            if superseded {
                tracing::debug!(test_type, session_id = %id, "mock session superseded");
            }
            !superseded
        });

        let session_id = uuid::Uuid::new_v4().to_string();
        state.open.insert(
            session_id.clone(),
            OpenSession {
                test_type: test_type.to_string(),
                started_at: Utc::now(),
            },
        );
        tracing::debug!(test_type, session_id = %session_id, "mock session opened");
        Ok(set.ticket(session_id, self.reveal_answers))
    }

    async fn submit_test(
        &self,
        session_id: &str,
        answers: &AnswerMap,
    ) -> Result<SubmitSummary, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.last_submission = Some((session_id.to_string(), answers.clone()));
        if let Some(error) = state.fail_submit.take() {
            return Err(error);
        }

        let open = state
            .open
            .remove(session_id)
            .ok_or_else(|| ApiError::NotFound(format!("unknown session: {session_id}")))?;
        let set = self
            .sets
            .get(&open.test_type)
            .ok_or_else(|| ApiError::NotFound(format!("unknown test type: {}", open.test_type)))?;

        let outcome = self
            .scoring
            .score(&set.questions, answers, &expected_answers(&set.questions));

        let now = Utc::now();
        let test_id = state.next_result_id;
        state.next_result_id += 1;
        let cooldown_end = self.cooldowns.cooldown_end(&open.test_type, now);

        let result = TestResult {
            test_id,
            test_type: open.test_type.clone(),
            test_date: now,
            score: outcome.score,
            duration: (now - open.started_at).num_seconds().max(0) as u64,
            details: outcome.details,
            mistakes: outcome.mistakes,
            cooldown_end: Some(cooldown_end),
        };

        state.history.push(TestHistoryEntry {
            test_id,
            test_date: now,
            test_type: open.test_type,
            score: result.score,
            duration: result.duration,
            details: serde_json::to_value(&result.details).unwrap_or_default(),
            cooldown_end: Some(cooldown_end),
        });
        let summary = SubmitSummary {
            score: result.score,
            test_id,
            total_questions: Some(result.details.total_questions),
            correct_answers: Some(result.details.correct_answers),
            cooldown_end: Some(cooldown_end),
        };
        state.results.insert(test_id, result);

        Ok(summary)
    }

    async fn get_result(&self, result_id: i64) -> Result<TestResult, ApiError> {
        self.lock()
            .results
            .get(&result_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown result: {result_id}")))
    }

    async fn get_cooldown(&self, test_type: &str) -> Result<CooldownStatus, ApiError> {
        let state = self.lock();
        let record = self.cooldown_record(&state, test_type);
        Ok(CooldownStatus {
            in_cooldown: record.in_cooldown,
            cooldown_end: record.cooldown_end.filter(|_| record.in_cooldown),
        })
    }
}

#[async_trait]
impl HistorySource for MockTestApi {
    async fn history(&self) -> Result<Vec<TestHistoryEntry>, ApiError> {
        let state = self.lock();
        match &state.fail_history {
            Some(error) => Err(error.clone()),
            None => Ok(state.history.clone()),
        }
    }
}

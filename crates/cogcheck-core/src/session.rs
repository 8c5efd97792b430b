//! Session lifecycle.
//!
//! [`SessionController::start`] checks eligibility, requests a question set,
//! and spawns a driver task that exclusively owns the cursor and answer map.
//! Callers talk to the driver through an [`ActiveSession`] (commands in,
//! [`SessionSnapshot`]s out). The driver races the overall countdown against
//! every question timer; the countdown always wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cooldown::{Availability, CooldownPolicy, CooldownRecord};
use crate::error::{ApiError, SessionError};
use crate::model::{Answer, AnswerMap, ResultDetails, TestQuestion, TestResult};
use crate::question::{Interaction, QuestionEngine, QuestionPhase, QuestionTiming};
use crate::scheduler::TimerEvent;
use crate::scoring::{categorize, expected_answers, ExpectedAnswers, ScoringConfig, ScoringEngine};
use crate::traits::{HistorySource, TestApi};

/// Runtime tuning for sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound of the random extra wait before a reaction stimulus.
    #[serde(default = "default_jitter_ms")]
    pub stimulus_jitter_ms: u64,
    #[serde(default = "default_response_window_ms")]
    pub response_window_ms: u64,
    /// How often snapshots are refreshed while nothing else happens.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Fixed seed for stimulus selection and jitter; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_response_window_ms() -> u64 {
    3000
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stimulus_jitter_ms: default_jitter_ms(),
            response_window_ms: default_response_window_ms(),
            tick_ms: default_tick_ms(),
            seed: None,
        }
    }
}

impl SessionConfig {
    pub fn question_timing(&self) -> QuestionTiming {
        QuestionTiming {
            stimulus_jitter: Duration::from_millis(self.stimulus_jitter_ms),
            response_window: Duration::from_millis(self.response_window_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Cancelled,
    /// Submission failed; see [`SessionSnapshot::error`].
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Point-in-time view of a session for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub test_type: String,
    pub session_id: String,
    pub cursor: usize,
    pub total_questions: usize,
    pub current_question: Option<TestQuestion>,
    pub phase: Option<QuestionPhase>,
    pub time_remaining: Duration,
    pub answered: usize,
    /// Clicks before a stimulus appeared, across the session.
    pub false_starts: u32,
    pub timed_out: bool,
    /// Running tally over answered questions, when the session carries
    /// expected answers.
    pub provisional: Option<ResultDetails>,
    pub result: Option<TestResult>,
    pub error: Option<String>,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        result: TestResult,
        answers: AnswerMap,
        timed_out: bool,
    },
    Cancelled,
}

#[derive(Debug)]
enum Command {
    Answer { question_id: String, payload: String },
    Interact { question_id: String, interaction: Interaction },
    Cancel,
    ForceTimeout,
}

/// Starts sessions against a test API.
pub struct SessionController {
    api: Arc<dyn TestApi>,
    history: Arc<dyn HistorySource>,
    cooldowns: CooldownPolicy,
    scoring: ScoringEngine,
    config: SessionConfig,
}

impl SessionController {
    pub fn new(api: Arc<dyn TestApi>, history: Arc<dyn HistorySource>) -> Self {
        Self {
            api,
            history,
            cooldowns: CooldownPolicy::default(),
            scoring: ScoringEngine::default(),
            config: SessionConfig::default(),
        }
    }

    pub fn with_cooldowns(mut self, policy: CooldownPolicy) -> Self {
        self.cooldowns = policy;
        self
    }

    pub fn with_scoring(mut self, config: ScoringConfig) -> Self {
        self.scoring = ScoringEngine::new(config);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Check whether `test_type` may be started now.
    ///
    /// The local mirror derived from history rejects early; the server's
    /// cooldown decision is always consulted as well. History failures other
    /// than an authorization failure only skip the local mirror.
    pub async fn check_availability(&self, test_type: &str) -> Result<Availability, SessionError> {
        let now = Utc::now();

        match self.history.history().await {
            Ok(entries) => {
                let record = CooldownRecord::derive(test_type, &entries, &self.cooldowns, now);
                let availability = record.availability(now);
                if !availability.available {
                    return Err(ineligible(test_type, availability, record.cooldown_end));
                }
            }
            Err(ApiError::Unauthorized(message)) => {
                return Err(SessionError::Unauthorized(message));
            }
            Err(e) => {
                tracing::warn!(test_type, error = %e, "history unavailable, skipping local cooldown check");
            }
        }

        let status = self
            .api
            .get_cooldown(test_type)
            .await
            .map_err(|e| SessionError::start(test_type, e))?;
        if status.in_cooldown {
            let availability = Availability {
                available: false,
                remaining_seconds: status.remaining_seconds(now),
            };
            return Err(ineligible(test_type, availability, status.cooldown_end));
        }

        Ok(Availability::OPEN)
    }

    /// Start a session for `test_type`.
    pub async fn start(&self, test_type: &str) -> Result<ActiveSession, SessionError> {
        self.check_availability(test_type).await?;

        let ticket = self
            .api
            .start_test(test_type)
            .await
            .map_err(|e| SessionError::start(test_type, e))?;

        let deadline = Instant::now()
            .checked_add(Duration::from_secs(ticket.time_limit_secs))
            .ok_or_else(|| {
                SessionError::start(
                    test_type,
                    ApiError::InvalidResponse(format!(
                        "time limit of {}s is out of range",
                        ticket.time_limit_secs
                    )),
                )
            })?;

        tracing::info!(
            test_type,
            session_id = %ticket.session_id,
            questions = ticket.questions.len(),
            time_limit_secs = ticket.time_limit_secs,
            "session started"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let initial = SessionSnapshot {
            state: SessionState::InProgress,
            test_type: test_type.to_string(),
            session_id: ticket.session_id.clone(),
            total_questions: ticket.questions.len(),
            time_remaining: Duration::from_secs(ticket.time_limit_secs),
            ..SessionSnapshot::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);

        let driver = SessionDriver {
            api: Arc::clone(&self.api),
            scoring: self.scoring.clone(),
            cooldowns: self.cooldowns.clone(),
            config: self.config.clone(),
            test_type: test_type.to_string(),
            session_id: ticket.session_id.clone(),
            expected: expected_answers(&ticket.questions),
            questions: ticket.questions,
            answers: AnswerMap::new(),
            cursor: 0,
            engine: None,
            deadline,
            rng: self.config.rng(),
            timer_tx,
            state_tx,
            state: SessionState::InProgress,
            false_starts: 0,
            timed_out: false,
            result: None,
            error: None,
        };
        let task = tokio::spawn(driver.run(command_rx, timer_rx));

        Ok(ActiveSession {
            handle: SessionHandle {
                session_id: ticket.session_id,
                test_type: test_type.to_string(),
                commands: command_tx,
                state: state_rx,
            },
            task,
        })
    }
}

fn ineligible(
    test_type: &str,
    availability: Availability,
    cooldown_end: Option<DateTime<Utc>>,
) -> SessionError {
    tracing::info!(
        test_type,
        remaining_seconds = availability.remaining_seconds,
        "start rejected, test in cooldown"
    );
    SessionError::Ineligible {
        test_type: test_type.to_string(),
        remaining_seconds: availability.remaining_seconds,
        cooldown_end,
    }
}

/// Cloneable handle for interacting with a running session.
///
/// When every handle (and the owning [`ActiveSession`]) is dropped, the
/// session is cancelled.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    test_type: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn test_type(&self) -> &str {
        &self.test_type
    }

    /// Submit a fully formed answer payload for `question_id`.
    ///
    /// Ignored unless `question_id` is the current question and its input is
    /// open.
    pub fn submit_answer(&self, question_id: &str, payload: impl Into<String>) {
        self.send(Command::Answer {
            question_id: question_id.to_string(),
            payload: payload.into(),
        });
    }

    /// Forward a user interaction to the current question.
    pub fn interact(&self, question_id: &str, interaction: Interaction) {
        self.send(Command::Interact {
            question_id: question_id.to_string(),
            interaction,
        });
    }

    /// Discard the session without submitting.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// End the session now and submit what has been answered.
    pub fn force_timeout(&self) {
        self.send(Command::ForceTimeout);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(session_id = %self.session_id, "session already closed");
        }
    }
}

/// A running session and its result.
#[derive(Debug)]
pub struct ActiveSession {
    handle: SessionHandle,
    task: JoinHandle<Result<SessionOutcome, SessionError>>,
}

impl ActiveSession {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn session_id(&self) -> &str {
        self.handle.session_id()
    }

    pub fn test_type(&self) -> &str {
        self.handle.test_type()
    }

    pub fn submit_answer(&self, question_id: &str, payload: impl Into<String>) {
        self.handle.submit_answer(question_id, payload);
    }

    pub fn interact(&self, question_id: &str, interaction: Interaction) {
        self.handle.interact(question_id, interaction);
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn force_timeout(&self) {
        self.handle.force_timeout();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.handle.subscribe()
    }

    /// Wait for the session to end: all questions answered, time up,
    /// forced timeout or cancellation.
    pub async fn finish(self) -> Result<SessionOutcome, SessionError> {
        let ActiveSession { handle, task } = self;
        let outcome = task.await;
        drop(handle);
        outcome.map_err(|e| SessionError::Aborted(e.to_string()))?
    }
}

enum Ending {
    Completed { timed_out: bool },
    Cancelled,
}

/// Single writer of the session's cursor and answers.
struct SessionDriver {
    api: Arc<dyn TestApi>,
    scoring: ScoringEngine,
    cooldowns: CooldownPolicy,
    config: SessionConfig,
    test_type: String,
    session_id: String,
    questions: Vec<TestQuestion>,
    expected: ExpectedAnswers,
    answers: AnswerMap,
    cursor: usize,
    engine: Option<QuestionEngine>,
    deadline: Instant,
    rng: StdRng,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    state_tx: watch::Sender<SessionSnapshot>,
    state: SessionState,
    false_starts: u32,
    timed_out: bool,
    result: Option<TestResult>,
    error: Option<String>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) -> Result<SessionOutcome, SessionError> {
        match self.drive(&mut commands, &mut timers).await {
            Ending::Cancelled => {
                self.close_question();
                self.state = SessionState::Cancelled;
                self.publish();
                tracing::info!(session_id = %self.session_id, "session cancelled");
                Ok(SessionOutcome::Cancelled)
            }
            Ending::Completed { timed_out } => self.complete(timed_out).await,
        }
    }

    async fn drive(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        timers: &mut mpsc::UnboundedReceiver<TimerEvent>,
    ) -> Ending {
        if self.questions.is_empty() {
            return Ending::Completed { timed_out: false };
        }
        self.arm_current();
        self.publish();

        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    tracing::info!(session_id = %self.session_id, "time limit reached");
                    return Ending::Completed { timed_out: true };
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!(session_id = %self.session_id, "all handles dropped");
                        return Ending::Cancelled;
                    };
                    if Instant::now() >= self.deadline {
                        return Ending::Completed { timed_out: true };
                    }
                    match command {
                        Command::Cancel => return Ending::Cancelled,
                        Command::ForceTimeout => {
                            tracing::info!(session_id = %self.session_id, "timeout forced");
                            return Ending::Completed { timed_out: true };
                        }
                        Command::Answer { question_id, payload } => {
                            let answer = self
                                .current_engine(&question_id)
                                .and_then(|engine| engine.submit_raw(payload));
                            if self.accept(answer) {
                                return Ending::Completed { timed_out: false };
                            }
                        }
                        Command::Interact { question_id, interaction } => {
                            let now = Instant::now();
                            let answer = self
                                .current_engine(&question_id)
                                .and_then(|engine| engine.interact(interaction, now));
                            if self.accept(answer) {
                                return Ending::Completed { timed_out: false };
                            }
                        }
                    }
                    self.publish();
                }

                Some(event) = timers.recv() => {
                    let answer = match self.engine.as_mut() {
                        Some(engine) => {
                            engine.on_timer(event, Instant::now(), &mut self.rng, &self.timer_tx)
                        }
                        None => None,
                    };
                    if self.accept(answer) {
                        return Ending::Completed { timed_out: false };
                    }
                    self.publish();
                }

                _ = ticker.tick() => self.publish(),
            }
        }
    }

    /// The active engine, if `question_id` names the current question.
    fn current_engine(&mut self, question_id: &str) -> Option<&mut QuestionEngine> {
        let engine = self.engine.as_mut()?;
        if engine.question().id != question_id {
            tracing::debug!(
                question_id,
                current = %engine.question().id,
                "ignoring input for a question that is not current"
            );
            return None;
        }
        Some(engine)
    }

    /// Record a captured answer and advance. Returns `true` when that was the
    /// last question.
    fn accept(&mut self, answer: Option<Answer>) -> bool {
        let Some(answer) = answer else {
            return false;
        };
        let Some(engine) = self.engine.take() else {
            return false;
        };
        self.false_starts += engine.false_starts();
        let question_id = engine.question().id.clone();
        drop(engine);

        tracing::debug!(session_id = %self.session_id, question_id = %question_id, "answer recorded");
        self.answers.insert(question_id, answer.into_string());

        if self.cursor + 1 < self.questions.len() {
            self.cursor += 1;
            self.arm_current();
            false
        } else {
            true
        }
    }

    fn arm_current(&mut self) {
        let Some(question) = self.questions.get(self.cursor).cloned() else {
            return;
        };
        let mut engine = QuestionEngine::new(self.cursor, question, self.config.question_timing());
        engine.arm(&mut self.rng, &self.timer_tx);
        self.engine = Some(engine);
    }

    fn close_question(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            self.false_starts += engine.false_starts();
            engine.teardown();
        }
    }

    async fn complete(mut self, timed_out: bool) -> Result<SessionOutcome, SessionError> {
        self.close_question();
        self.state = SessionState::Complete;
        self.timed_out = timed_out;
        self.publish();

        tracing::info!(
            session_id = %self.session_id,
            answered = self.answers.len(),
            total = self.questions.len(),
            timed_out,
            "submitting session"
        );

        match self.submit().await {
            Ok(result) => {
                tracing::info!(
                    session_id = %self.session_id,
                    score = result.score,
                    "session scored"
                );
                self.result = Some(result.clone());
                self.publish();
                Ok(SessionOutcome::Completed {
                    result,
                    answers: self.answers,
                    timed_out,
                })
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "submission failed");
                self.state = SessionState::Failed;
                self.error = Some(e.to_string());
                self.publish();
                Err(SessionError::submit(&self.session_id, e))
            }
        }
    }

    async fn submit(&self) -> Result<TestResult, ApiError> {
        let summary = self.api.submit_test(&self.session_id, &self.answers).await?;
        let mut result = self.api.get_result(summary.test_id).await?;

        if result.details.error_analysis.is_none() && !result.mistakes.is_empty() {
            result.details.error_analysis = Some(categorize(&self.questions, &result.mistakes));
        }
        if result.cooldown_end.is_none() {
            result.cooldown_end = Some(
                summary
                    .cooldown_end
                    .unwrap_or_else(|| self.cooldowns.cooldown_end(&self.test_type, result.test_date)),
            );
        }
        Ok(result)
    }

    fn provisional(&self) -> Option<ResultDetails> {
        if self.expected.is_empty() {
            return None;
        }
        let answered: Vec<TestQuestion> = self
            .questions
            .iter()
            .filter(|q| self.answers.contains_key(&q.id))
            .cloned()
            .collect();
        Some(self.scoring.score(&answered, &self.answers, &self.expected).details)
    }

    fn publish(&self) {
        let in_progress = self.state == SessionState::InProgress;
        let snapshot = SessionSnapshot {
            state: self.state,
            test_type: self.test_type.clone(),
            session_id: self.session_id.clone(),
            cursor: self.cursor,
            total_questions: self.questions.len(),
            current_question: self.engine.as_ref().map(|e| e.question().clone()),
            phase: self.engine.as_ref().map(QuestionEngine::phase),
            time_remaining: if in_progress {
                self.deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            },
            answered: self.answers.len(),
            false_starts: self.false_starts
                + self.engine.as_ref().map_or(0, QuestionEngine::false_starts),
            timed_out: self.timed_out,
            provisional: self.provisional(),
            result: self.result.clone(),
            error: self.error.clone(),
        };
        self.state_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CooldownStatus, QuestionKind, SessionTicket, SubmitSummary, TestHistoryEntry,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    struct StubApi {
        ticket: SessionTicket,
        history: Vec<TestHistoryEntry>,
        cooldown: CooldownStatus,
        start_error: Option<ApiError>,
        submit_error: Option<ApiError>,
        history_error: Option<ApiError>,
        submitted: Mutex<Option<AnswerMap>>,
        starts: AtomicU32,
    }

    impl StubApi {
        fn new(questions: Vec<TestQuestion>, time_limit_secs: u64) -> Self {
            Self {
                ticket: SessionTicket {
                    session_id: "s-1".into(),
                    questions,
                    time_limit_secs,
                },
                history: Vec::new(),
                cooldown: CooldownStatus {
                    in_cooldown: false,
                    cooldown_end: None,
                },
                start_error: None,
                submit_error: None,
                history_error: None,
                submitted: Mutex::new(None),
                starts: AtomicU32::new(0),
            }
        }

        fn submitted(&self) -> Option<AnswerMap> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TestApi for StubApi {
        fn name(&self) -> &str {
            "stub"
        }

        async fn start_test(&self, _test_type: &str) -> Result<SessionTicket, ApiError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            match &self.start_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.ticket.clone()),
            }
        }

        async fn submit_test(
            &self,
            _session_id: &str,
            answers: &AnswerMap,
        ) -> Result<SubmitSummary, ApiError> {
            *self.submitted.lock().unwrap() = Some(answers.clone());
            if let Some(e) = &self.submit_error {
                return Err(e.clone());
            }
            Ok(SubmitSummary {
                score: 0,
                test_id: 1,
                total_questions: None,
                correct_answers: None,
                cooldown_end: None,
            })
        }

        async fn get_result(&self, result_id: i64) -> Result<TestResult, ApiError> {
            let answers = self.submitted().unwrap_or_default();
            let outcome = ScoringEngine::default().score(
                &self.ticket.questions,
                &answers,
                &expected_answers(&self.ticket.questions),
            );
            Ok(TestResult {
                test_id: result_id,
                test_type: "logic".into(),
                test_date: Utc::now(),
                score: outcome.score,
                duration: 60,
                details: ResultDetails {
                    error_analysis: None,
                    ..outcome.details
                },
                mistakes: outcome.mistakes,
                cooldown_end: None,
            })
        }

        async fn get_cooldown(&self, _test_type: &str) -> Result<CooldownStatus, ApiError> {
            Ok(self.cooldown.clone())
        }
    }

    #[async_trait]
    impl HistorySource for StubApi {
        async fn history(&self) -> Result<Vec<TestHistoryEntry>, ApiError> {
            match &self.history_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.history.clone()),
            }
        }
    }

    fn logic_questions(n: usize) -> Vec<TestQuestion> {
        (1..=n)
            .map(|i| {
                TestQuestion::new(format!("q{i}"), QuestionKind::Logic, format!("Question {i}"))
                    .with_options(["a", "b"])
                    .with_correct_answer("a")
            })
            .collect()
    }

    fn controller(api: &Arc<StubApi>) -> SessionController {
        SessionController::new(api.clone(), api.clone()).with_config(SessionConfig {
            stimulus_jitter_ms: 0,
            seed: Some(1),
            ..SessionConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_submits_partial_answers() {
        let api = Arc::new(StubApi::new(logic_questions(3), 60));
        let session = controller(&api).start("logic").await.unwrap();

        sleep(Duration::from_secs(10)).await;
        session.submit_answer("q1", "a");
        sleep(Duration::from_secs(10)).await;
        session.submit_answer("q2", "b");

        match session.finish().await.unwrap() {
            SessionOutcome::Completed {
                result,
                answers,
                timed_out,
            } => {
                assert!(timed_out);
                assert_eq!(answers.len(), 2);
                assert_eq!(result.details.total_questions, 3);
                assert!(result.details.correct_answers <= 2);
                assert_eq!(result.score, 33);
                assert!(result.cooldown_end.is_some());
                assert_eq!(
                    result.details.error_analysis.unwrap().get("verbal logic"),
                    Some(&2)
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.submitted().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_answers_are_ignored() {
        let api = Arc::new(StubApi::new(logic_questions(2), 60));
        let session = controller(&api).start("logic").await.unwrap();

        session.submit_answer("q2", "a");
        sleep(Duration::from_millis(10)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.cursor, 0);
        assert_eq!(snapshot.answered, 0);

        session.submit_answer("q1", "a");
        session.submit_answer("q1", "b");
        sleep(Duration::from_millis(10)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.cursor, 1);
        assert_eq!(snapshot.answered, 1);
        assert_eq!(snapshot.current_question.unwrap().id, "q2");
        assert_eq!(snapshot.provisional.unwrap().correct_answers, 1);

        session.submit_answer("q2", "a");
        match session.finish().await.unwrap() {
            SessionOutcome::Completed {
                answers, timed_out, ..
            } => {
                assert!(!timed_out);
                assert_eq!(answers.get("q1").map(String::as_str), Some("a"));
                assert_eq!(answers.len(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_session() {
        let api = Arc::new(StubApi::new(logic_questions(2), 60));
        let session = controller(&api).start("logic").await.unwrap();
        let updates = session.subscribe();

        session.submit_answer("q1", "a");
        session.cancel();
        assert_eq!(session.finish().await.unwrap(), SessionOutcome::Cancelled);
        assert!(api.submitted().is_none());

        let snapshot = updates.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Cancelled);
        assert_eq!(snapshot.answered, 1);
        assert!(snapshot.phase.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_cancels() {
        let api = Arc::new(StubApi::new(logic_questions(2), 60));
        let session = controller(&api).start("logic").await.unwrap();
        let updates = session.subscribe();

        drop(session);
        sleep(Duration::from_secs(120)).await;
        assert_eq!(updates.borrow().state, SessionState::Cancelled);
        assert!(api.submitted().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn force_timeout_submits_immediately() {
        let api = Arc::new(StubApi::new(logic_questions(3), 600));
        let session = controller(&api).start("logic").await.unwrap();
        session.submit_answer("q1", "a");
        session.force_timeout();

        match session.finish().await.unwrap() {
            SessionOutcome::Completed {
                answers, timed_out, ..
            } => {
                assert!(timed_out);
                assert_eq!(answers.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_click_before_reveal_never_counts() {
        let questions = vec![
            TestQuestion::new("r1", QuestionKind::Reaction, "Click when it appears").with_delay(1.0),
            TestQuestion::new("l1", QuestionKind::Logic, "Yes or no?").with_options(["yes", "no"]),
        ];
        let api = Arc::new(StubApi::new(questions, 60));
        let session = controller(&api).start("reaction").await.unwrap();

        sleep(Duration::from_millis(500)).await;
        session.interact("r1", Interaction::Click);
        sleep(Duration::from_millis(700)).await;
        assert_eq!(session.snapshot().false_starts, 1);
        session.interact("r1", Interaction::Click);
        sleep(Duration::from_millis(100)).await;
        session.interact("r1", Interaction::Click);
        sleep(Duration::from_millis(10)).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.answered, 1);
        assert_eq!(snapshot.cursor, 1);

        session.submit_answer("l1", "yes");
        match session.finish().await.unwrap() {
            SessionOutcome::Completed { answers, .. } => {
                assert_eq!(answers.get("r1").map(String::as_str), Some("click:200"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_completes_immediately() {
        let api = Arc::new(StubApi::new(Vec::new(), 60));
        let session = controller(&api).start("logic").await.unwrap();
        match session.finish().await.unwrap() {
            SessionOutcome::Completed {
                result, timed_out, ..
            } => {
                assert!(!timed_out);
                assert_eq!(result.score, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_cooldown_rejects_start() {
        let mut stub = StubApi::new(logic_questions(1), 60);
        stub.history = vec![TestHistoryEntry {
            test_id: 4,
            test_date: Utc::now() - chrono::Duration::hours(1),
            test_type: "logic".into(),
            score: 90,
            duration: 40,
            details: serde_json::Value::Null,
            cooldown_end: None,
        }];
        let api = Arc::new(stub);

        let err = controller(&api).start("logic").await.unwrap_err();
        let remaining = err.remaining_seconds().unwrap();
        assert!(remaining > 22 * 3600 && remaining <= 23 * 3600);
        assert_eq!(api.starts.load(Ordering::SeqCst), 0);

        // Other test types are unaffected.
        assert!(controller(&api).check_availability("memory").await.is_ok());
    }

    #[tokio::test]
    async fn server_cooldown_is_authoritative() {
        let mut stub = StubApi::new(logic_questions(1), 60);
        stub.cooldown = CooldownStatus {
            in_cooldown: true,
            cooldown_end: Some(Utc::now() + chrono::Duration::minutes(10)),
        };
        stub.history_error = Some(ApiError::Network("down".into()));
        let api = Arc::new(stub);

        let err = controller(&api).start("logic").await.unwrap_err();
        assert!(matches!(err, SessionError::Ineligible { .. }));
        assert!(err.remaining_seconds().unwrap() <= 600);
    }

    #[tokio::test]
    async fn out_of_range_time_limit_is_a_start_error() {
        let api = Arc::new(StubApi::new(logic_questions(1), u64::MAX));
        let err = controller(&api).start("logic").await.unwrap_err();
        match err {
            SessionError::Start { source, .. } => {
                assert!(matches!(source, ApiError::InvalidResponse(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(api.submitted().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_preempts_pending_stimulus() {
        let questions = vec![
            TestQuestion::new("r1", QuestionKind::Reaction, "Click when it appears").with_delay(6.0),
        ];
        let api = Arc::new(StubApi::new(questions, 5));
        let session = controller(&api).start("reaction").await.unwrap();
        let updates = session.subscribe();
        let handle = session.handle();

        let clicker = tokio::spawn(async move {
            sleep(Duration::from_millis(5500)).await;
            handle.interact("r1", Interaction::Click);
        });

        match session.finish().await.unwrap() {
            SessionOutcome::Completed {
                answers, timed_out, ..
            } => {
                assert!(timed_out);
                assert!(answers.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        clicker.await.unwrap();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(api.submitted().unwrap().len(), 0);
        let snapshot = updates.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Complete);
        assert_eq!(snapshot.answered, 0);
        assert!(snapshot.phase.is_none());
        assert_eq!(snapshot.time_remaining, Duration::ZERO);
    }

    #[tokio::test]
    async fn unauthorized_start_is_terminal() {
        let mut stub = StubApi::new(logic_questions(1), 60);
        stub.start_error = Some(ApiError::Unauthorized("token expired".into()));
        let api = Arc::new(stub);

        let err = controller(&api).start("logic").await.unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failure_surfaces_as_error_state() {
        let mut stub = StubApi::new(logic_questions(1), 60);
        stub.submit_error = Some(ApiError::Http {
            status: 500,
            message: "database unavailable".into(),
        });
        let api = Arc::new(stub);
        let session = controller(&api).start("logic").await.unwrap();
        let updates = session.subscribe();

        session.submit_answer("q1", "a");
        let err = session.finish().await.unwrap_err();
        assert!(matches!(err, SessionError::Submit { .. }));

        let snapshot = updates.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Failed);
        assert!(snapshot.error.unwrap().contains("database unavailable"));
        assert!(snapshot.result.is_none());
    }
}

//! End-to-end session flows against the in-memory API.
//!
//! Timers run on tokio's paused clock, so reaction windows and countdowns
//! advance deterministically.

use std::sync::Arc;
use std::time::Duration;

use cogcheck_client::MockTestApi;
use cogcheck_core::cooldown::CooldownPolicy;
use cogcheck_core::error::{ApiError, SessionError};
use cogcheck_core::history;
use cogcheck_core::model::{QuestionKind, Stimulus, TestQuestion};
use cogcheck_core::parser::QuestionSet;
use cogcheck_core::question::{Interaction, QuestionPhase};
use cogcheck_core::report::ResultReport;
use cogcheck_core::session::{SessionConfig, SessionController, SessionOutcome, SessionState};
use cogcheck_core::traits::HistorySource;
use tokio::time::sleep;

fn set(test_type: &str, time_limit_secs: u64, questions: Vec<TestQuestion>) -> QuestionSet {
    QuestionSet {
        test_type: test_type.into(),
        name: test_type.into(),
        description: String::new(),
        time_limit_secs,
        questions,
    }
}

fn memory_set() -> QuestionSet {
    set(
        "memory",
        120,
        vec![
            TestQuestion::new("m1", QuestionKind::Words, "Remember: plane, river")
                .with_options(["plane", "tower", "river"])
                .with_delay(2.0)
                .with_correct_answer("plane,river"),
            TestQuestion::new("m2", QuestionKind::Math, "2 + 2 = ?").with_correct_answer("4"),
        ],
    )
}

fn reaction_set() -> QuestionSet {
    set(
        "reaction",
        60,
        vec![
            TestQuestion::new("r1", QuestionKind::Reaction, "Click when the target appears")
                .with_delay(1.0),
            TestQuestion::new("r2", QuestionKind::GoNoGo, "Click on green only")
                .with_stimulus(Stimulus::One("red".into())),
            TestQuestion::new("r3", QuestionKind::ChoiceReaction, "Press the side of the shape")
                .with_stimulus(Stimulus::One("circle".into()))
                .with_correct_answer("circle:left"),
        ],
    )
}

fn controller(api: &Arc<MockTestApi>) -> SessionController {
    SessionController::new(api.clone(), api.clone()).with_config(SessionConfig {
        stimulus_jitter_ms: 0,
        seed: Some(7),
        ..SessionConfig::default()
    })
}

fn completed(outcome: SessionOutcome) -> cogcheck_core::model::TestResult {
    match outcome {
        SessionOutcome::Completed { result, .. } => result,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn full_memory_run_then_cooldown() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    let controller = controller(&api);
    let session = controller.start("memory").await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        session.snapshot().phase,
        Some(QuestionPhase::Displaying { .. })
    ));
    session.interact("m1", Interaction::Toggle("plane".into()));
    sleep(Duration::from_millis(2_000)).await;
    assert!(matches!(
        session.snapshot().phase,
        Some(QuestionPhase::AwaitingInput { .. })
    ));

    session.interact("m1", Interaction::Toggle("plane".into()));
    session.interact("m1", Interaction::Toggle("tower".into()));
    session.interact("m1", Interaction::Toggle("river".into()));
    session.interact("m1", Interaction::Toggle("tower".into()));
    session.interact("m1", Interaction::Submit);
    session.interact("m2", Interaction::Text(" 4 ".into()));
    session.interact("m2", Interaction::Submit);

    let result = completed(session.finish().await.unwrap());
    assert_eq!(result.score, 100);
    assert_eq!(result.details.total_questions, 2);
    assert!(result.mistakes.is_empty());
    assert!(result.cooldown_end.is_some());

    let (_, answers) = api.last_submission().unwrap();
    assert_eq!(answers["m1"], "plane,river");
    assert_eq!(answers["m2"], "4");

    let err = controller.start("memory").await.unwrap_err();
    assert!(matches!(err, SessionError::Ineligible { .. }), "got {err:?}");
    assert!(err.remaining_seconds().unwrap() > 86_000);
    assert_eq!(api.start_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaction_variants_capture_timed_payloads() {
    let api = Arc::new(MockTestApi::new([reaction_set()]));
    let session = controller(&api).start("reaction").await.unwrap();

    // simple reaction: stimulus after the 1s delay
    sleep(Duration::from_millis(1_200)).await;
    session.interact("r1", Interaction::Click);

    // go/no-go shows a no-go stimulus; withholding lets the window expire
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        session.snapshot().phase,
        Some(QuestionPhase::StimulusShown {
            stimulus: "red".into()
        })
    );
    sleep(Duration::from_millis(3_000)).await;

    // choice reaction, revealed when the go/no-go window closed at 4.2s
    assert_eq!(session.snapshot().cursor, 2);
    sleep(Duration::from_millis(340)).await;
    session.interact("r3", Interaction::Respond("left".into()));

    let result = completed(session.finish().await.unwrap());
    let (_, answers) = api.last_submission().unwrap();
    assert_eq!(answers["r1"], "click:200");
    assert_eq!(answers["r2"], "red:none");
    assert_eq!(answers["r3"], "circle:left:350");
    assert_eq!(result.details.correct_answers, 3);
    assert_eq!(result.score, 100);
}

#[tokio::test(start_paused = true)]
async fn clicking_a_no_go_stimulus_is_a_mistake() {
    let api = Arc::new(MockTestApi::new([reaction_set()]));
    let session = controller(&api).start("reaction").await.unwrap();

    sleep(Duration::from_millis(1_300)).await;
    session.interact("r1", Interaction::Click);
    sleep(Duration::from_millis(250)).await;
    session.interact("r2", Interaction::Click);
    sleep(Duration::from_millis(400)).await;
    session.interact("r3", Interaction::Respond("right".into()));

    let result = completed(session.finish().await.unwrap());
    assert_eq!(result.details.correct_answers, 1);
    assert_eq!(result.mistakes.len(), 2);
    assert!(result.details.error_analysis.is_some());
}

#[tokio::test(start_paused = true)]
async fn pairing_question_submits_slot_order() {
    let pairs = set(
        "cognitive",
        60,
        vec![TestQuestion::new("p1", QuestionKind::Pairs, "Match each instrument to its unit")
            .with_options(["altimeter", "airspeed"])
            .with_answer_options(["knots", "feet"])
            .with_correct_answer("feet,knots")],
    );
    let api = Arc::new(MockTestApi::new([pairs]).reveal_answers(true));
    let session = controller(&api).start("cognitive").await.unwrap();

    session.interact(
        "p1",
        Interaction::Assign {
            slot: 0,
            value: "feet".into(),
        },
    );
    session.interact("p1", Interaction::Submit);
    session.interact(
        "p1",
        Interaction::Assign {
            slot: 1,
            value: "knots".into(),
        },
    );
    session.interact("p1", Interaction::Submit);

    let result = completed(session.finish().await.unwrap());
    assert_eq!(result.score, 100);
    assert_eq!(api.last_submission().unwrap().1["p1"], "feet,knots");
}

#[tokio::test(start_paused = true)]
async fn time_limit_submits_what_was_answered() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    let session = controller(&api).start("memory").await.unwrap();
    let updates = session.subscribe();

    sleep(Duration::from_secs(3)).await;
    session.submit_answer("m1", "plane,river");
    sleep(Duration::from_secs(200)).await;

    match session.finish().await.unwrap() {
        SessionOutcome::Completed {
            result,
            answers,
            timed_out,
        } => {
            assert!(timed_out);
            assert_eq!(answers.len(), 1);
            assert_eq!(result.score, 50);
            assert_eq!(result.mistakes[0].user_answer, "");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let snapshot = updates.borrow().clone();
    assert_eq!(snapshot.state, SessionState::Complete);
    assert!(snapshot.timed_out);
    assert_eq!(snapshot.time_remaining, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn provisional_tally_when_answers_are_revealed() {
    let api = Arc::new(MockTestApi::new([memory_set()]).reveal_answers(true));
    let session = controller(&api).start("memory").await.unwrap();
    let hidden = Arc::new(MockTestApi::new([memory_set()]));
    let hidden_session = controller(&hidden).start("memory").await.unwrap();

    sleep(Duration::from_secs(3)).await;
    session.submit_answer("m1", "river");
    hidden_session.submit_answer("m1", "river");
    sleep(Duration::from_millis(10)).await;

    let provisional = session.snapshot().provisional.unwrap();
    assert_eq!(provisional.total_questions, 1);
    assert_eq!(provisional.correct_answers, 0);
    assert!(hidden_session.snapshot().provisional.is_none());

    session.cancel();
    hidden_session.cancel();
    assert_eq!(session.finish().await.unwrap(), SessionOutcome::Cancelled);
    assert_eq!(api.submit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_leaves_failed_state() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    api.fail_next_submit(ApiError::Http {
        status: 500,
        message: "database unavailable".into(),
    });
    let session = controller(&api).start("memory").await.unwrap();
    let updates = session.subscribe();
    session.force_timeout();

    let err = session.finish().await.unwrap_err();
    assert!(matches!(err, SessionError::Submit { .. }), "got {err:?}");
    let snapshot = updates.borrow().clone();
    assert_eq!(snapshot.state, SessionState::Failed);
    assert!(snapshot
        .error
        .unwrap()
        .contains("database unavailable"));
    assert!(snapshot.result.is_none());

    // nothing was recorded, so a retry is allowed
    assert!(controller(&api).start("memory").await.is_ok());
}

#[tokio::test]
async fn server_cooldown_applies_when_history_is_down() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    let session = controller(&api).start("memory").await.unwrap();
    session.force_timeout();
    session.finish().await.unwrap();

    api.fail_history(Some(ApiError::Network("connection reset".into())));
    let err = controller(&api).start("memory").await.unwrap_err();
    assert!(matches!(err, SessionError::Ineligible { .. }), "got {err:?}");
    assert_eq!(api.start_calls(), 1);
}

#[tokio::test]
async fn unauthorized_history_blocks_start() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    api.fail_history(Some(ApiError::Unauthorized("token expired".into())));

    let err = controller(&api).start("memory").await.unwrap_err();
    assert!(matches!(err, SessionError::Unauthorized(_)), "got {err:?}");
    assert_eq!(api.start_calls(), 0);
}

#[tokio::test]
async fn start_errors_are_reported() {
    let api = Arc::new(MockTestApi::new([memory_set()]));
    let err = controller(&api).start("attention").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Start {
            source: ApiError::NotFound(_),
            ..
        }
    ));

    api.fail_next_start(ApiError::Unauthorized("signed out".into()));
    let err = controller(&api).start("memory").await.unwrap_err();
    assert!(matches!(err, SessionError::Unauthorized(_)));
}

#[tokio::test]
async fn per_type_cooldown_override() {
    let policy = CooldownPolicy {
        default_minutes: 0,
        ..CooldownPolicy::default()
    }
    .with_window("memory", 30);
    let api = Arc::new(MockTestApi::new([memory_set(), reaction_set()]).with_cooldowns(policy.clone()));
    let controller = controller(&api).with_cooldowns(policy);

    for test_type in ["memory", "reaction"] {
        let session = controller.start(test_type).await.unwrap();
        session.force_timeout();
        session.finish().await.unwrap();
    }

    assert!(controller.check_availability("reaction").await.is_ok());
    let err = controller.check_availability("memory").await.unwrap_err();
    assert!(err.remaining_seconds().unwrap() <= 1800);
}

#[tokio::test(start_paused = true)]
async fn history_details_and_report() {
    let api = Arc::new(MockTestApi::new([memory_set(), reaction_set()]));
    let session = controller(&api).start("memory").await.unwrap();
    sleep(Duration::from_millis(2_100)).await;
    session.submit_answer("m1", "plane,tower");
    session.submit_answer("m2", "4");
    session.force_timeout();
    session.finish().await.unwrap();

    let entries = api.history().await.unwrap();
    let details = history::latest_details(api.as_ref(), &entries, &["memory", "reaction"]).await;
    assert_eq!(details.len(), 1);
    let (test_type, result) = &details[0];
    assert_eq!(test_type, "memory");
    let result = result.clone().unwrap();

    let report = ResultReport::new(result, &memory_set().questions);
    assert_eq!(report.result.details.correct_answers, 1);
    assert_eq!(report.mistakes_by_category["word recall"].len(), 1);
    let md = report.to_markdown();
    assert!(md.contains("plane,tower"));
    assert!(md.contains("**Score:** 50% (failed)"));
}

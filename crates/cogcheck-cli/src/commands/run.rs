//! The `cogcheck run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use cogcheck_client::config::{load_config_from, session_controller, CogcheckConfig};
use cogcheck_client::MockTestApi;
use cogcheck_core::error::{format_wait, SessionError};
use cogcheck_core::history::ResultStatus;
use cogcheck_core::model::{ReactionMode, TestQuestion, TestResult, VariantFamily};
use cogcheck_core::parser;
use cogcheck_core::question::{InputMode, Interaction, QuestionPhase};
use cogcheck_core::report::ResultReport;
use cogcheck_core::session::{SessionController, SessionHandle, SessionOutcome, SessionSnapshot};

/// How long to wait for a sent answer to register before reading more input.
const CAPTURE_WAIT: Duration = Duration::from_secs(2);

pub async fn execute(
    test_type: String,
    offline: Option<PathBuf>,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;

    let controller = match &offline {
        Some(path) => offline_controller(path, &config)?,
        None => session_controller(&config)?,
    };

    let session = controller.start(&test_type).await.map_err(start_error)?;
    println!("Session {} started: {test_type}", session.session_id());
    println!("Type q to quit without submitting.\n");

    let questions = drive(session.handle()).await?;

    match session.finish().await? {
        SessionOutcome::Cancelled => println!("Session cancelled, nothing was submitted."),
        SessionOutcome::Completed {
            result, timed_out, ..
        } => {
            if timed_out {
                println!("Time is up, answers submitted.");
            }
            print_result(&result);
            if let Some(path) = output {
                ResultReport::new(result, &questions).save_json(&path)?;
                eprintln!("Report saved to: {}", path.display());
            }
        }
    }

    Ok(())
}

/// A controller serving local question sets through the in-memory API.
fn offline_controller(path: &Path, config: &CogcheckConfig) -> Result<SessionController> {
    let sets = if path.is_dir() {
        parser::load_question_directory(path)?
    } else {
        vec![parser::parse_question_set(path)?]
    };
    anyhow::ensure!(!sets.is_empty(), "no question sets found in {}", path.display());

    let api = Arc::new(
        MockTestApi::new(sets)
            .with_cooldowns(config.cooldown.clone())
            .with_scoring(config.scoring.clone()),
    );
    Ok(SessionController::new(api.clone(), api)
        .with_cooldowns(config.cooldown.clone())
        .with_scoring(config.scoring.clone())
        .with_config(config.session.clone()))
}

fn start_error(e: SessionError) -> anyhow::Error {
    match e {
        SessionError::Ineligible {
            test_type,
            remaining_seconds,
            ..
        } => anyhow::anyhow!(
            "test '{test_type}' is in cooldown, next attempt in {}",
            format_wait(remaining_seconds)
        ),
        other => other.into(),
    }
}

enum Reply {
    /// An answer was sent and should be captured.
    Sent,
    Rejected(String),
    Ignored,
}

/// Read answers from stdin until the session leaves the in-progress state.
///
/// Returns the questions that were shown, for the report.
async fn drive(handle: SessionHandle) -> Result<Vec<TestQuestion>> {
    let mut updates = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seen: Vec<TestQuestion> = Vec::new();
    let mut shown: Option<(usize, &'static str)> = None;
    let mut pending: Option<(usize, Instant)> = None;
    let mut input_open = true;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.state.is_terminal() {
            break;
        }

        if let Some(question) = &snapshot.current_question {
            if !seen.iter().any(|q| q.id == question.id) {
                seen.push(question.clone());
            }
        }
        let view = (snapshot.cursor, phase_label(snapshot.phase.as_ref()));
        if shown != Some(view) {
            render(&snapshot);
            shown = Some(view);
        }

        if pending.is_some_and(|(answered, _)| snapshot.answered > answered) {
            pending = None;
        }
        let wants_line = input_open
            && pending.is_none()
            && snapshot.phase.as_ref().is_some_and(takes_input);
        let pending_until = pending.map(|(_, until)| until);

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(pending_until.unwrap_or_else(Instant::now)), if pending_until.is_some() => {
                pending = None;
            }
            line = lines.next_line(), if wants_line => {
                match line.context("failed to read input")? {
                    Some(line) if line.trim().eq_ignore_ascii_case("q") => {
                        input_open = false;
                        tracing::info!(session_id = %snapshot.session_id, "quit requested, cancelling session");
                        handle.cancel();
                    }
                    Some(line) => match respond(&handle, &snapshot, line.trim()) {
                        Reply::Sent => pending = Some((snapshot.answered, Instant::now() + CAPTURE_WAIT)),
                        Reply::Rejected(message) => {
                            tracing::debug!(cursor = snapshot.cursor, input = %line.trim(), reason = %message, "input rejected");
                            println!("  {message}");
                        }
                        Reply::Ignored => {}
                    },
                    None => {
                        input_open = false;
                        tracing::info!(session_id = %snapshot.session_id, answered = snapshot.answered, "stdin closed, forcing timeout");
                        eprintln!("Input closed, submitting answers.");
                        handle.force_timeout();
                    }
                }
            }
        }
    }

    Ok(seen)
}

fn takes_input(phase: &QuestionPhase) -> bool {
    matches!(
        phase,
        QuestionPhase::AwaitingInput { .. }
            | QuestionPhase::WaitingForStimulus
            | QuestionPhase::StimulusShown { .. }
    )
}

fn phase_label(phase: Option<&QuestionPhase>) -> &'static str {
    match phase {
        None => "none",
        Some(QuestionPhase::Armed) => "armed",
        Some(QuestionPhase::Displaying { .. }) => "displaying",
        Some(QuestionPhase::WaitingForStimulus) => "waiting",
        Some(QuestionPhase::StimulusShown { .. }) => "stimulus",
        Some(QuestionPhase::AwaitingInput { .. }) => "input",
        Some(QuestionPhase::Captured) => "captured",
        Some(QuestionPhase::Closed) => "closed",
    }
}

fn is_choice_reaction(question: &TestQuestion) -> bool {
    question.kind.family() == VariantFamily::Reaction(ReactionMode::Choice)
}

fn render(snapshot: &SessionSnapshot) {
    let (Some(question), Some(phase)) = (&snapshot.current_question, &snapshot.phase) else {
        return;
    };
    let header = format!(
        "[{}/{}] {} left",
        snapshot.cursor + 1,
        snapshot.total_questions,
        format_wait(snapshot.time_remaining.as_secs())
    );

    match phase {
        QuestionPhase::Displaying { material } => {
            println!("{header}");
            if material.items.is_empty() {
                println!("Memorize: {}", material.text);
            } else {
                println!("Memorize: {}", material.items.join("  "));
            }
        }
        QuestionPhase::WaitingForStimulus => {
            println!("{header}");
            println!("{}", question.prompt);
            println!("Get ready...");
        }
        QuestionPhase::StimulusShown { stimulus } => {
            let hint = if is_choice_reaction(question) {
                "type your response and press Enter"
            } else {
                "press Enter"
            };
            println!(">>> {} <<<  ({hint})", stimulus.to_uppercase());
        }
        QuestionPhase::AwaitingInput { mode, options } => {
            println!("{header}");
            let text = match (&question.question_text, question.kind.family()) {
                (Some(text), _) => text.as_str(),
                (None, VariantFamily::Recall) if !question.delay().is_zero() => {
                    "Which items were shown?"
                }
                (None, _) => question.prompt.as_str(),
            };
            println!("{text}");
            match mode {
                InputMode::SingleChoice => print_numbered(options),
                InputMode::MultiChoice => {
                    print_numbered(options);
                    println!("(select all that apply, comma-separated)");
                }
                InputMode::Pairing => {
                    print_numbered(question.options());
                    println!("Match with:");
                    print_numbered(options);
                    println!("(one answer per item, comma-separated)");
                }
                InputMode::FreeText => {}
            }
        }
        QuestionPhase::Armed | QuestionPhase::Captured | QuestionPhase::Closed => {}
    }
}

fn print_numbered(options: &[String]) {
    for (i, option) in options.iter().enumerate() {
        println!("  {}. {option}", i + 1);
    }
}

fn respond(handle: &SessionHandle, snapshot: &SessionSnapshot, line: &str) -> Reply {
    let (Some(question), Some(phase)) = (&snapshot.current_question, &snapshot.phase) else {
        return Reply::Ignored;
    };
    let id = question.id.as_str();

    match phase {
        QuestionPhase::WaitingForStimulus => {
            handle.interact(id, Interaction::Click);
            Reply::Rejected("too early, wait for the stimulus".into())
        }
        QuestionPhase::StimulusShown { .. } => {
            if is_choice_reaction(question) {
                if line.is_empty() {
                    return Reply::Rejected("type your response, e.g. left".into());
                }
                handle.interact(id, Interaction::Respond(line.to_string()));
            } else {
                handle.interact(id, Interaction::Click);
            }
            Reply::Sent
        }
        QuestionPhase::AwaitingInput { mode, options } => {
            answer(handle, question, *mode, options, line)
        }
        _ => Reply::Ignored,
    }
}

fn answer(
    handle: &SessionHandle,
    question: &TestQuestion,
    mode: InputMode,
    options: &[String],
    line: &str,
) -> Reply {
    let id = question.id.as_str();
    let parts = split_list(line);
    if parts.is_empty() {
        return Reply::Rejected("enter an answer".into());
    }

    match mode {
        InputMode::FreeText => handle.interact(id, Interaction::Text(line.to_string())),
        InputMode::SingleChoice => match resolve_option(line, options) {
            Some(option) => handle.interact(id, Interaction::Choose(option)),
            None => return Reply::Rejected(format!("unknown option '{line}'")),
        },
        InputMode::MultiChoice => {
            let mut picked: Vec<String> = Vec::new();
            for part in parts {
                match resolve_option(part, options) {
                    Some(option) if !picked.contains(&option) => picked.push(option),
                    Some(_) => {}
                    None => return Reply::Rejected(format!("unknown option '{part}'")),
                }
            }
            for option in picked {
                handle.interact(id, Interaction::Toggle(option));
            }
        }
        InputMode::Pairing => {
            let slots = question.options().len();
            if parts.len() != slots {
                return Reply::Rejected(format!("give {slots} answers, one per item"));
            }
            let mut values = Vec::with_capacity(slots);
            for part in parts {
                match resolve_option(part, options) {
                    Some(value) => values.push(value),
                    None => return Reply::Rejected(format!("unknown option '{part}'")),
                }
            }
            for (slot, value) in values.into_iter().enumerate() {
                handle.interact(id, Interaction::Assign { slot, value });
            }
        }
    }

    handle.interact(id, Interaction::Submit);
    Reply::Sent
}

fn split_list(line: &str) -> Vec<&str> {
    let parts: Vec<&str> = if line.contains(',') {
        line.split(',').collect()
    } else {
        line.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Match input against the option text first, then as a 1-based number.
fn resolve_option(input: &str, options: &[String]) -> Option<String> {
    let input = input.trim();
    if let Some(option) = options.iter().find(|o| o.eq_ignore_ascii_case(input)) {
        return Some(option.clone());
    }
    input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i))
        .cloned()
}

fn print_result(result: &TestResult) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec![
        "Test",
        "Score",
        "Status",
        "Correct",
        "Duration",
        "Next attempt",
    ]);
    table.add_row(vec![
        Cell::new(&result.test_type),
        Cell::new(format!("{}%", result.score)),
        Cell::new(ResultStatus::from_score(result.score)),
        Cell::new(format!(
            "{}/{}",
            result.details.correct_answers, result.details.total_questions
        )),
        Cell::new(format_wait(result.duration)),
        Cell::new(
            result
                .cooldown_end
                .map(|end| end.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]);
    println!("\n{table}");

    if result.mistakes.is_empty() {
        return;
    }

    let mut mistakes = Table::new();
    mistakes.set_header(vec!["Question", "Your answer", "Correct answer"]);
    for m in &result.mistakes {
        let given = if m.user_answer.is_empty() {
            "(no answer)"
        } else {
            m.user_answer.as_str()
        };
        mistakes.add_row(vec![m.question.as_str(), given, m.correct_answer.as_str()]);
    }
    println!("\n{mistakes}");

    if let Some(analysis) = &result.details.error_analysis {
        println!("\nMistakes by category:");
        for (category, count) in analysis {
            println!("  {category}: {count}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        ["3", "4", "yes"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_match_text_before_number() {
        assert_eq!(resolve_option("3", &options()).as_deref(), Some("3"));
        assert_eq!(resolve_option("YES", &options()).as_deref(), Some("yes"));
        assert_eq!(resolve_option("1", &options()).as_deref(), Some("3"));
        assert_eq!(resolve_option("0", &options()), None);
        assert_eq!(resolve_option("9", &options()), None);
    }

    #[test]
    fn lists_split_on_commas_or_spaces() {
        assert_eq!(split_list("1, 3 ,"), vec!["1", "3"]);
        assert_eq!(split_list("plane river"), vec!["plane", "river"]);
        assert!(split_list("  ").is_empty());
    }
}

//! Answer scoring and mistake categorization.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{
    AnswerMap, Mistake, QuestionKind, ReactionMode, ReactionResponse, ResultDetails,
    TestQuestion, VariantFamily,
};
use crate::question::InputMode;

/// Expected answers keyed by question id.
pub type ExpectedAnswers = HashMap<String, String>;

/// Category used when nothing more specific matches.
pub const FALLBACK_CATEGORY: &str = "other";

/// How a response to a no-go stimulus counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoGoPolicy {
    /// The trial is scored as a mistake.
    #[default]
    Incorrect,
    /// The trial is dropped from the total.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Faster responses are anticipations and count as premature.
    #[serde(default = "default_min_reaction_ms")]
    pub min_reaction_ms: u64,
    /// Slowest accepted response unless the question's expected answer is a
    /// number, which then acts as the bound.
    #[serde(default = "default_max_reaction_ms")]
    pub max_reaction_ms: u64,
    #[serde(default)]
    pub no_go_policy: NoGoPolicy,
}

fn default_min_reaction_ms() -> u64 {
    100
}

fn default_max_reaction_ms() -> u64 {
    1000
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_reaction_ms: default_min_reaction_ms(),
            max_reaction_ms: default_max_reaction_ms(),
            no_go_policy: NoGoPolicy::default(),
        }
    }
}

/// Outcome for a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
    /// Not counted toward the total.
    Excluded,
}

/// Result of scoring one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub score: u32,
    pub details: ResultDetails,
    pub mistakes: Vec<Mistake>,
}

/// Compares submitted answers to expected ones, per variant.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a session.
    ///
    /// Questions missing from `answers` are mistakes with an empty
    /// `user_answer`. Pure: the same inputs always give the same outcome.
    pub fn score(
        &self,
        questions: &[TestQuestion],
        answers: &AnswerMap,
        expected: &ExpectedAnswers,
    ) -> ScoreOutcome {
        let mut total = 0u32;
        let mut correct = 0u32;
        let mut mistakes = Vec::new();

        for question in questions {
            let given = answers.get(&question.id).map(String::as_str);
            let want = expected
                .get(&question.id)
                .map(String::as_str)
                .or(question.correct_answer.as_deref());

            match self.judge(question, given, want) {
                Verdict::Excluded => {}
                Verdict::Correct => {
                    total += 1;
                    correct += 1;
                }
                Verdict::Incorrect => {
                    total += 1;
                    mistakes.push(Mistake {
                        question: display_text(question).to_string(),
                        user_answer: given.unwrap_or_default().to_string(),
                        correct_answer: want
                            .map(str::to_string)
                            .unwrap_or_else(|| self.describe_expected(question)),
                    });
                }
            }
        }

        let analysis = categorize(questions, &mistakes);
        ScoreOutcome {
            score: percentage(correct, total),
            details: ResultDetails {
                total_questions: total,
                correct_answers: correct,
                error_analysis: (!analysis.is_empty()).then_some(analysis),
            },
            mistakes,
        }
    }

    /// Judge one question.
    pub fn judge(
        &self,
        question: &TestQuestion,
        given: Option<&str>,
        expected: Option<&str>,
    ) -> Verdict {
        if let VariantFamily::Reaction(mode) = question.kind.family() {
            return self.judge_reaction(question, mode, given, expected);
        }

        let Some(expected) = expected else {
            tracing::warn!(question = %question.id, "no expected answer, scoring as incorrect");
            return Verdict::Incorrect;
        };
        let Some(given) = given else {
            return Verdict::Incorrect;
        };

        let matches = match equality_rule(question) {
            Equality::Exact => given.trim() == expected.trim(),
            Equality::Set => item_set(given) == item_set(expected),
            Equality::Ordered => item_list(given) == item_list(expected),
        };
        if matches {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }

    fn judge_reaction(
        &self,
        question: &TestQuestion,
        mode: ReactionMode,
        given: Option<&str>,
        expected: Option<&str>,
    ) -> Verdict {
        let Some(response) = given.and_then(ReactionResponse::parse) else {
            return Verdict::Incorrect;
        };
        let bound = expected
            .and_then(|e| e.trim().parse::<u64>().ok())
            .unwrap_or(self.config.max_reaction_ms);
        let timely = |ms: Option<u64>| {
            ms.is_some_and(|ms| ms >= self.config.min_reaction_ms && ms <= bound)
        };

        let correct = match mode {
            ReactionMode::Simple => timely(response.reaction_ms),
            ReactionMode::GoNoGo => {
                if question.is_no_go(&response.stimulus) {
                    if response.reaction_ms.is_none() {
                        true
                    } else if self.config.no_go_policy == NoGoPolicy::Exclude {
                        return Verdict::Excluded;
                    } else {
                        false
                    }
                } else {
                    timely(response.reaction_ms)
                }
            }
            ReactionMode::Choice => match choice_key(question, &response.stimulus, expected) {
                Some(side) => {
                    response
                        .choice
                        .as_deref()
                        .is_some_and(|c| c.eq_ignore_ascii_case(&side))
                        && timely(response.reaction_ms)
                }
                None => {
                    tracing::warn!(
                        question = %question.id,
                        stimulus = %response.stimulus,
                        "no response mapping for stimulus, scoring as incorrect"
                    );
                    false
                }
            },
        };

        if correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }

    fn describe_expected(&self, question: &TestQuestion) -> String {
        let window = format!(
            "{}-{} ms",
            self.config.min_reaction_ms, self.config.max_reaction_ms
        );
        match question.kind.family() {
            VariantFamily::Reaction(ReactionMode::Simple) => format!("response within {window}"),
            VariantFamily::Reaction(ReactionMode::GoNoGo) => {
                format!("response within {window} on go, none on no-go")
            }
            _ => String::new(),
        }
    }
}

/// Expected answers taken from the questions themselves.
pub fn expected_answers(questions: &[TestQuestion]) -> ExpectedAnswers {
    questions
        .iter()
        .filter_map(|q| {
            q.correct_answer
                .as_ref()
                .map(|answer| (q.id.clone(), answer.clone()))
        })
        .collect()
}

/// `round(100 * correct / total)`, or 0 when there is nothing to count.
pub fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(correct) / f64::from(total)).round() as u32
}

enum Equality {
    Exact,
    Set,
    Ordered,
}

fn equality_rule(question: &TestQuestion) -> Equality {
    match question.kind {
        QuestionKind::Pairs => Equality::Ordered,
        QuestionKind::Sequence
        | QuestionKind::Words
        | QuestionKind::Images
        | QuestionKind::Matrix
        | QuestionKind::Grid => Equality::Set,
        _ if InputMode::for_question(question) == InputMode::MultiChoice => Equality::Set,
        _ => Equality::Exact,
    }
}

fn item_list(payload: &str) -> Vec<&str> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn item_set(payload: &str) -> BTreeSet<&str> {
    item_list(payload).into_iter().collect()
}

/// The side that answers `stimulus` in a choice-reaction question.
///
/// The expected answer may spell the mapping out (`circle:left,square:right`)
/// or name a single side; otherwise the stimulus list pairs index-wise with
/// `answer_options`.
fn choice_key(question: &TestQuestion, stimulus: &str, expected: Option<&str>) -> Option<String> {
    if let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) {
        if expected.contains(':') {
            return expected.split(',').find_map(|pair| {
                let (stim, side) = pair.split_once(':')?;
                stim.trim()
                    .eq_ignore_ascii_case(stimulus)
                    .then(|| side.trim().to_string())
            });
        }
        if expected.parse::<u64>().is_err() {
            return Some(expected.to_string());
        }
    }

    let index = question
        .stimuli()
        .iter()
        .position(|s| s.eq_ignore_ascii_case(stimulus))?;
    question.answer_options().get(index).cloned()
}

fn display_text(question: &TestQuestion) -> &str {
    if !question.prompt.trim().is_empty() {
        question.prompt.as_str()
    } else {
        question.question_text.as_deref().unwrap_or(&question.id)
    }
}

/// Count mistakes per category.
///
/// Mistakes are matched back to their question by prompt text; mistakes whose
/// question is unknown are categorized from the text alone. Every mistake is
/// counted exactly once.
pub fn categorize(questions: &[TestQuestion], mistakes: &[Mistake]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for mistake in mistakes {
        *counts
            .entry(mistake_category(questions, mistake).to_string())
            .or_insert(0) += 1;
    }
    counts
}

/// Category of one mistake.
pub fn mistake_category(questions: &[TestQuestion], mistake: &Mistake) -> &'static str {
    questions
        .iter()
        .find(|q| display_text(q) == mistake.question)
        .map(category_for)
        .unwrap_or_else(|| category_from_text(&mistake.question))
}

/// Coarse category for a question, by variant tag.
pub fn category_for(question: &TestQuestion) -> &'static str {
    match question.kind {
        QuestionKind::Sequence => "sequences",
        QuestionKind::Words => "word recall",
        QuestionKind::Images => "image recall",
        QuestionKind::Pairs => "pairing",
        QuestionKind::Matrix | QuestionKind::Grid => "matrix recall",
        QuestionKind::Count => "counting",
        QuestionKind::Logic => "verbal logic",
        QuestionKind::Math => "math",
        QuestionKind::Spatial => "spatial reasoning",
        QuestionKind::Select => "object selection",
        QuestionKind::Difference => "difference spotting",
        QuestionKind::Pattern => "pattern recognition",
        QuestionKind::Reaction
        | QuestionKind::QuickChoice
        | QuestionKind::GoNoGo
        | QuestionKind::ChoiceReaction => "reaction",
        QuestionKind::Other(_) => category_from_text(display_text(question)),
    }
}

const KEYWORDS: &[(&str, &[&str])] = &[
    ("sequences", &["sequence", "последовательн"]),
    ("word recall", &["word", "слов"]),
    ("image recall", &["image", "picture", "изображен", "картин"]),
    ("counting", &["how many", "count", "сколько", "посчитай"]),
    ("verbal logic", &["logic", "conclude", "логик", "вывод"]),
    ("math", &["calculate", "sum", "вычисл", "сумм", "+", "="]),
    ("spatial reasoning", &["rotate", "spatial", "поверн", "пространств"]),
    ("object selection", &["select", "choose", "выбер"]),
    ("reaction", &["react", "click", "реакц", "нажм"]),
];

/// Category guessed from prompt text.
pub fn category_from_text(text: &str) -> &'static str {
    let text = text.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| text.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

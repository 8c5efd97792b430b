//! Core data model types for cogcheck.
//!
//! These are the wire and runtime shapes shared by every part of the system:
//! questions and their variant tags, answers, results and history rows.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Submitted answers keyed by question id.
pub type AnswerMap = HashMap<String, String>;

/// Payload marker for a reaction question that timed out without a response.
pub const NO_RESPONSE: &str = "none";

/// Separates the fields of a reaction payload; stimuli and choices must not
/// contain it.
pub const PAYLOAD_SEPARATOR: char = ':';

/// Stimuli treated as "do not respond" in go/no-go questions that do not
/// list their own.
pub const DEFAULT_NO_GO_STIMULI: &[&str] = &["no-go", "nogo", "stop", "red"];

// ---------------------------------------------------------------------------
// Variant tags
// ---------------------------------------------------------------------------

/// The closed set of question variants.
///
/// Unknown tags deserialize to [`QuestionKind::Other`] and are handled as
/// direct-answer questions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionKind {
    Difference,
    Count,
    Pattern,
    Logic,
    Math,
    Select,
    Spatial,
    Sequence,
    Words,
    Images,
    Pairs,
    Matrix,
    Grid,
    Reaction,
    QuickChoice,
    GoNoGo,
    ChoiceReaction,
    Other(String),
}

/// How a variant behaves at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantFamily {
    /// Material is displayed for `delay` seconds, then reconstructed.
    Recall,
    /// A stimulus appears after a randomized wait and the response is timed.
    Reaction(ReactionMode),
    /// Input is available immediately.
    Direct,
}

/// Which interaction completes a reaction question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionMode {
    /// Any click on the stimulus.
    Simple,
    /// Click on "go" stimuli, withhold on "no-go" stimuli.
    GoNoGo,
    /// Pick the side mapped to the stimulus.
    Choice,
}

impl QuestionKind {
    pub fn family(&self) -> VariantFamily {
        match self {
            QuestionKind::Sequence
            | QuestionKind::Words
            | QuestionKind::Images
            | QuestionKind::Pairs
            | QuestionKind::Matrix
            | QuestionKind::Grid => VariantFamily::Recall,
            QuestionKind::Reaction | QuestionKind::QuickChoice => {
                VariantFamily::Reaction(ReactionMode::Simple)
            }
            QuestionKind::GoNoGo => VariantFamily::Reaction(ReactionMode::GoNoGo),
            QuestionKind::ChoiceReaction => VariantFamily::Reaction(ReactionMode::Choice),
            QuestionKind::Difference
            | QuestionKind::Count
            | QuestionKind::Pattern
            | QuestionKind::Logic
            | QuestionKind::Math
            | QuestionKind::Select
            | QuestionKind::Spatial
            | QuestionKind::Other(_) => VariantFamily::Direct,
        }
    }

    pub fn is_reaction(&self) -> bool {
        matches!(self.family(), VariantFamily::Reaction(_))
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            QuestionKind::Difference => "difference",
            QuestionKind::Count => "count",
            QuestionKind::Pattern => "pattern",
            QuestionKind::Logic => "logic",
            QuestionKind::Math => "math",
            QuestionKind::Select => "select",
            QuestionKind::Spatial => "spatial",
            QuestionKind::Sequence => "sequence",
            QuestionKind::Words => "words",
            QuestionKind::Images => "images",
            QuestionKind::Pairs => "pairs",
            QuestionKind::Matrix => "matrix",
            QuestionKind::Grid => "grid",
            QuestionKind::Reaction => "reaction",
            QuestionKind::QuickChoice => "quick_choice",
            QuestionKind::GoNoGo => "go_no_go",
            QuestionKind::ChoiceReaction => "choice_reaction",
            QuestionKind::Other(tag) => tag.as_str(),
        };
        f.write_str(tag)
    }
}

impl From<&str> for QuestionKind {
    fn from(raw: &str) -> Self {
        let tag = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match tag.as_str() {
            "difference" => QuestionKind::Difference,
            "count" => QuestionKind::Count,
            "pattern" => QuestionKind::Pattern,
            "logic" => QuestionKind::Logic,
            "math" => QuestionKind::Math,
            "select" => QuestionKind::Select,
            "spatial" => QuestionKind::Spatial,
            "sequence" => QuestionKind::Sequence,
            "words" => QuestionKind::Words,
            "images" | "image" => QuestionKind::Images,
            "pairs" => QuestionKind::Pairs,
            "matrix" => QuestionKind::Matrix,
            "grid" => QuestionKind::Grid,
            "reaction" => QuestionKind::Reaction,
            "quick_choice" => QuestionKind::QuickChoice,
            "go_no_go" | "gonogo" | "go_nogo" => QuestionKind::GoNoGo,
            "choice_reaction" => QuestionKind::ChoiceReaction,
            other if other.contains("reaction") => QuestionKind::Reaction,
            _ => QuestionKind::Other(raw.trim().to_string()),
        }
    }
}

impl From<String> for QuestionKind {
    fn from(raw: String) -> Self {
        QuestionKind::from(raw.as_str())
    }
}

impl From<QuestionKind> for String {
    fn from(kind: QuestionKind) -> Self {
        kind.to_string()
    }
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

/// Stimulus for reaction questions: a fixed value or a set to draw from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stimulus {
    One(String),
    Many(Vec<String>),
}

impl Stimulus {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Stimulus::One(value) => vec![value.as_str()],
            Stimulus::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// A single question as delivered by the test API.
///
/// Only the fields relevant to the question's [`QuestionKind`] are read; the
/// rest are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    /// Prompt text shown to the user.
    #[serde(rename = "question", default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stimulus: Option<Stimulus>,
    /// Pre-display delay in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_select: Option<bool>,
    /// Right-hand column for pairing questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
    /// Stimuli that must not be answered (go/no-go only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_go: Option<Vec<String>>,
}

impl TestQuestion {
    pub fn new(id: impl Into<String>, kind: QuestionKind, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt: prompt.into(),
            options: None,
            image: None,
            images: None,
            grid: None,
            matrix: None,
            stimulus: None,
            delay: None,
            multiple_select: None,
            answer_options: None,
            correct_answer: None,
            question_text: None,
            animation: None,
            no_go: None,
        }
    }

    pub fn with_options<S: Into<String>>(mut self, options: impl IntoIterator<Item = S>) -> Self {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_answer_options<S: Into<String>>(
        mut self,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        self.answer_options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_correct_answer(mut self, answer: impl Into<String>) -> Self {
        self.correct_answer = Some(answer.into());
        self
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay = Some(seconds);
        self
    }

    pub fn with_stimulus(mut self, stimulus: Stimulus) -> Self {
        self.stimulus = Some(stimulus);
        self
    }

    pub fn with_multiple_select(mut self, multiple: bool) -> Self {
        self.multiple_select = Some(multiple);
        self
    }

    pub fn options(&self) -> &[String] {
        self.options.as_deref().unwrap_or_default()
    }

    pub fn answer_options(&self) -> &[String] {
        self.answer_options.as_deref().unwrap_or_default()
    }

    /// Pre-display delay; negative, non-finite or unrepresentable values
    /// count as zero.
    pub fn delay(&self) -> Duration {
        match self.delay {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
                tracing::warn!(question_id = %self.id, delay = secs, "delay out of range, ignoring it");
                Duration::ZERO
            }),
            _ => Duration::ZERO,
        }
    }

    pub fn stimuli(&self) -> Vec<&str> {
        self.stimulus
            .as_ref()
            .map(Stimulus::values)
            .unwrap_or_default()
    }

    /// Whether `stimulus` is one the user must not respond to.
    pub fn is_no_go(&self, stimulus: &str) -> bool {
        match &self.no_go {
            Some(list) => list.iter().any(|s| s.eq_ignore_ascii_case(stimulus)),
            None => DEFAULT_NO_GO_STIMULI
                .iter()
                .any(|s| s.eq_ignore_ascii_case(stimulus)),
        }
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// An opaque answer payload whose shape depends on the question variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answer(String);

impl Answer {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// Multi-select payload: selections sorted and comma-joined.
    pub fn multi<S: AsRef<str>>(selections: impl IntoIterator<Item = S>) -> Self {
        let mut items: Vec<String> = selections
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        items.sort();
        Self(items.join(","))
    }

    /// Pairing payload: slot values comma-joined in slot order.
    pub fn pairs<S: AsRef<str>>(slots: impl IntoIterator<Item = S>) -> Self {
        let items: Vec<String> = slots.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self(items.join(","))
    }

    /// Simple or go/no-go reaction payload: `<token>:<reactionTimeMs>`.
    pub fn reaction(token: &str, reaction_ms: u64) -> Self {
        Self(format!("{token}:{reaction_ms}"))
    }

    /// Choice-reaction payload: `<stimulus>:<choice>:<reactionTimeMs>`.
    pub fn choice_reaction(stimulus: &str, choice: &str, reaction_ms: u64) -> Self {
        Self(format!("{stimulus}:{choice}:{reaction_ms}"))
    }

    /// No response before the reaction window closed.
    pub fn no_response(stimulus: &str) -> Self {
        Self(format!("{stimulus}:{NO_RESPONSE}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded reaction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionResponse {
    pub stimulus: String,
    pub choice: Option<String>,
    /// `None` when the user did not respond.
    pub reaction_ms: Option<u64>,
}

impl ReactionResponse {
    /// Decode `<token>:<ms>`, `<stimulus>:<choice>:<ms>` or `<stimulus>:none`.
    pub fn parse(payload: &str) -> Option<Self> {
        let parts: Vec<&str> = payload.split(PAYLOAD_SEPARATOR).map(str::trim).collect();
        let (stimulus, choice, timing) = match parts.as_slice() {
            [stimulus, timing] => (*stimulus, None, *timing),
            [stimulus, choice, timing] => (*stimulus, Some(*choice), *timing),
            _ => return None,
        };
        let reaction_ms = if timing == NO_RESPONSE {
            None
        } else {
            Some(timing.parse::<u64>().ok()?)
        };
        Some(Self {
            stimulus: stimulus.to_string(),
            choice: choice.map(str::to_string),
            reaction_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

/// A freshly started session as returned by the test API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTicket {
    #[serde(rename = "test_id")]
    pub session_id: String,
    #[serde(default)]
    pub questions: Vec<TestQuestion>,
    #[serde(rename = "time_limit")]
    pub time_limit_secs: u64,
}

/// Score summary returned when a session is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitSummary {
    #[serde(deserialize_with = "score_from_number")]
    pub score: u32,
    /// Identifier of the stored result.
    pub test_id: i64,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub correct_answers: Option<u32>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub cooldown_end: Option<DateTime<Utc>>,
}

/// Server-side cooldown decision for a test type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub in_cooldown: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub cooldown_end: Option<DateTime<Utc>>,
}

impl CooldownStatus {
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        if !self.in_cooldown {
            return 0;
        }
        self.cooldown_end
            .map(|end| ceil_seconds(end - now))
            .unwrap_or(0)
    }
}

/// Round a signed duration up to whole seconds, clamping at zero.
pub(crate) fn ceil_seconds(delta: chrono::Duration) -> u64 {
    let ms = delta.num_milliseconds();
    if ms <= 0 {
        0
    } else {
        ((ms + 999) / 1000) as u64
    }
}

/// Aggregate counts for a scored session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDetails {
    pub total_questions: u32,
    pub correct_answers: u32,
    /// Mistake counts per category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<BTreeMap<String, u32>>,
}

/// One incorrectly answered (or unanswered) question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mistake {
    pub question: String,
    #[serde(default)]
    pub user_answer: String,
    pub correct_answer: String,
}

/// The full result of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: i64,
    pub test_type: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub test_date: DateTime<Utc>,
    #[serde(deserialize_with = "score_from_number")]
    pub score: u32,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: u64,
    pub details: ResultDetails,
    #[serde(default)]
    pub mistakes: Vec<Mistake>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub cooldown_end: Option<DateTime<Utc>>,
}

/// One row of the user's test history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestHistoryEntry {
    pub test_id: i64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub test_date: DateTime<Utc>,
    pub test_type: String,
    #[serde(deserialize_with = "score_from_number")]
    pub score: u32,
    #[serde(default)]
    pub duration: u64,
    /// Raw details blob as stored by the server.
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub cooldown_end: Option<DateTime<Utc>>,
}

/// Scores arrive as reals from some backends; keep them integral in `0..=100`.
fn score_from_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.round().clamp(0.0, 100.0) as u32)
}

/// Timestamp parsing that accepts RFC 3339 and naive ISO-8601 (read as UTC).
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}

//! TOML question-set parser.
//!
//! Loads offline question sets from TOML files and directories, and
//! validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{
    QuestionKind, ReactionMode, SessionTicket, TestQuestion, VariantFamily, PAYLOAD_SEPARATOR,
};
use crate::question::{InputMode, Material};

/// Intermediate TOML structure for parsing question-set files.
#[derive(Debug, Deserialize)]
struct TomlQuestionFile {
    set: TomlSetHeader,
    #[serde(default)]
    questions: Vec<TestQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlSetHeader {
    test_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default = "default_time_limit")]
    time_limit_secs: u64,
}

fn default_time_limit() -> u64 {
    300
}

/// A named, ordered list of questions for one test type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionSet {
    pub test_type: String,
    pub name: String,
    pub description: String,
    pub time_limit_secs: u64,
    pub questions: Vec<TestQuestion>,
}

impl QuestionSet {
    /// Build a session ticket; `reveal_answers = false` strips `correct_answer`
    /// the way a server would before sending questions to a client.
    pub fn ticket(&self, session_id: impl Into<String>, reveal_answers: bool) -> SessionTicket {
        let questions = self
            .questions
            .iter()
            .cloned()
            .map(|mut q| {
                if !reveal_answers {
                    q.correct_answer = None;
                }
                q
            })
            .collect();

        SessionTicket {
            session_id: session_id.into(),
            questions,
            time_limit_secs: self.time_limit_secs,
        }
    }
}

/// Parse a single TOML file into a `QuestionSet`.
pub fn parse_question_set(path: &Path) -> Result<QuestionSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read question set file: {}", path.display()))?;

    parse_question_set_str(&content, path)
}

/// Parse a TOML string into a `QuestionSet`.
pub fn parse_question_set_str(content: &str, source_path: &Path) -> Result<QuestionSet> {
    let parsed: TomlQuestionFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let header = parsed.set;
    if header.test_type.trim().is_empty() {
        anyhow::bail!("{}: test_type must not be empty", source_path.display());
    }

    Ok(QuestionSet {
        name: header.name.unwrap_or_else(|| header.test_type.clone()),
        test_type: header.test_type,
        description: header.description,
        time_limit_secs: header.time_limit_secs,
        questions: parsed.questions,
    })
}

/// Recursively load all `.toml` question sets from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_question_directory(dir: &Path) -> Result<Vec<QuestionSet>> {
    let mut sets = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            sets.extend(load_question_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_question_set(&path) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(sets)
}

/// A warning from question-set validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question ID (if applicable).
    pub question_id: Option<String>,
    pub message: String,
}

impl ValidationWarning {
    fn question(q: &TestQuestion, message: impl Into<String>) -> Self {
        Self {
            question_id: Some(q.id.clone()),
            message: message.into(),
        }
    }
}

/// Validate a question set for data the engine would have to degrade on.
pub fn validate_question_set(set: &QuestionSet) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if set.time_limit_secs == 0 {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "time_limit_secs is 0, sessions would end immediately".into(),
        });
    }
    if set.questions.is_empty() {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "set has no questions".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for q in &set.questions {
        if !seen_ids.insert(&q.id) {
            warnings.push(ValidationWarning::question(
                q,
                format!("duplicate question ID: {}", q.id),
            ));
        }
    }

    for q in &set.questions {
        if q.prompt.trim().is_empty() {
            warnings.push(ValidationWarning::question(q, "prompt is empty"));
        }
        if let QuestionKind::Other(tag) = &q.kind {
            warnings.push(ValidationWarning::question(
                q,
                format!("unknown type '{tag}', treated as a direct answer"),
            ));
        }
        warnings.extend(variant_warnings(q));
    }

    warnings
}

fn variant_warnings(q: &TestQuestion) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    match q.kind.family() {
        VariantFamily::Reaction(mode) => {
            if q.stimuli().is_empty() && mode != ReactionMode::Simple {
                warnings.push(ValidationWarning::question(q, "reaction question has no stimulus"));
            }
            for stimulus in q.stimuli().into_iter().filter(|s| s.contains(PAYLOAD_SEPARATOR)) {
                warnings.push(ValidationWarning::question(
                    q,
                    format!("stimulus '{stimulus}' contains '{PAYLOAD_SEPARATOR}', answers to it cannot be scored"),
                ));
            }
            if mode == ReactionMode::Choice
                && q.correct_answer.is_none()
                && q.answer_options().len() < q.stimuli().len()
            {
                warnings.push(ValidationWarning::question(
                    q,
                    "choice reaction needs correct_answer or one answer option per stimulus",
                ));
            }
        }
        VariantFamily::Recall | VariantFamily::Direct => {
            if q.correct_answer.is_none() {
                warnings.push(ValidationWarning::question(q, "no correct_answer provided"));
            }
            if q.multiple_select == Some(true) && q.options().is_empty() {
                warnings.push(ValidationWarning::question(
                    q,
                    "multiple_select is set but no options are provided",
                ));
            }
            if q.kind == QuestionKind::Select && q.options().is_empty() {
                warnings.push(ValidationWarning::question(q, "select question has no options"));
            }
            if q.kind == QuestionKind::Pairs
                && (InputMode::for_question(q) != InputMode::Pairing || q.answer_options().is_empty())
            {
                warnings.push(ValidationWarning::question(
                    q,
                    "pairs question needs both options and answer_options",
                ));
            }
            if q.kind.family() == VariantFamily::Recall
                && !q.delay().is_zero()
                && Material::for_question(q).items.is_empty()
            {
                warnings.push(ValidationWarning::question(
                    q,
                    "no recall items could be extracted from the prompt",
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[set]
test_type = "memory"
name = "Memory check"
description = "Short-term recall"
time_limit_secs = 120

[[questions]]
id = "m1"
type = "sequence"
question = "Remember the sequence: 7, 2, 9"
delay = 3
correct_answer = "7,2,9"

[[questions]]
id = "m2"
type = "words"
question = "Which words were shown?"
options = ["plane", "tower", "river"]
correct_answer = "plane,river"

[[questions]]
id = "r1"
type = "go-no-go"
question = "Click on green only"
stimulus = ["green", "red"]
"#;

    #[test]
    fn parse_valid_toml() {
        let set = parse_question_set_str(VALID_TOML, &PathBuf::from("memory.toml")).unwrap();
        assert_eq!(set.test_type, "memory");
        assert_eq!(set.name, "Memory check");
        assert_eq!(set.time_limit_secs, 120);
        assert_eq!(set.questions.len(), 3);
        assert_eq!(set.questions[0].delay(), std::time::Duration::from_secs(3));
        assert_eq!(set.questions[2].kind, QuestionKind::GoNoGo);
        assert!(validate_question_set(&set).is_empty());
    }

    #[test]
    fn parse_missing_optional_fields() {
        let toml = r#"
[set]
test_type = "logic"

[[questions]]
id = "l1"
type = "logic"
question = "All pilots are trained. Ann is a pilot. Is Ann trained?"
options = ["yes", "no"]
correct_answer = "yes"
"#;
        let set = parse_question_set_str(toml, &PathBuf::from("logic.toml")).unwrap();
        assert_eq!(set.name, "logic");
        assert_eq!(set.time_limit_secs, 300);
        assert!(set.description.is_empty());
    }

    #[test]
    fn ticket_can_strip_answers() {
        let set = parse_question_set_str(VALID_TOML, &PathBuf::from("memory.toml")).unwrap();
        let hidden = set.ticket("s-1", false);
        assert_eq!(hidden.session_id, "s-1");
        assert!(hidden.questions.iter().all(|q| q.correct_answer.is_none()));
        let shown = set.ticket("s-2", true);
        assert_eq!(shown.questions[0].correct_answer.as_deref(), Some("7,2,9"));
    }

    #[test]
    fn validate_catches_broken_questions() {
        let toml = r#"
[set]
test_type = "mixed"
time_limit_secs = 0

[[questions]]
id = "same"
type = "choice_reaction"
question = "Pick a side"

[[questions]]
id = "same"
type = "pairs"
question = ""
options = ["a"]

[[questions]]
id = "w"
type = "words"
question = "Remember these"
delay = 2
correct_answer = "x"
"#;
        let set = parse_question_set_str(toml, &PathBuf::from("mixed.toml")).unwrap();
        let messages: Vec<String> = validate_question_set(&set)
            .into_iter()
            .map(|w| w.message)
            .collect();

        let has = |needle: &str| messages.iter().any(|m| m.contains(needle));
        assert!(has("time_limit_secs is 0"));
        assert!(has("duplicate"));
        assert!(has("no stimulus"));
        assert!(has("prompt is empty"));
        assert!(has("answer_options"));
        assert!(has("no recall items"));
    }

    #[test]
    fn validate_flags_stimulus_with_separator() {
        let toml = r#"
[set]
test_type = "reaction"

[[questions]]
id = "g1"
type = "go_no_go"
question = "Respond to 10:30 only"
stimulus = ["10:30", "green"]
"#;
        let set = parse_question_set_str(toml, &PathBuf::from("reaction.toml")).unwrap();
        let warnings = validate_question_set(&set);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].question_id.as_deref(), Some("g1"));
        assert!(warnings[0].message.contains("'10:30'"));
    }

    #[test]
    fn parse_malformed_toml() {
        let bad = "this is not [valid toml }{";
        assert!(parse_question_set_str(bad, &PathBuf::from("bad.toml")).is_err());
        assert!(parse_question_set_str("[set]\ntest_type = \" \"", &PathBuf::from("x.toml")).is_err());
    }

    #[test]
    fn load_directory_recurses_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memory.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "[set").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("logic.toml"),
            "[set]\ntest_type = \"logic\"\n",
        )
        .unwrap();

        let sets = load_question_directory(dir.path()).unwrap();
        let types: Vec<&str> = sets.iter().map(|s| s.test_type.as_str()).collect();
        assert_eq!(types, vec!["memory", "logic"]);
    }

    #[test]
    fn load_directory_rejects_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(load_question_directory(file.path()).is_err());
    }
}

//! Result reports with JSON persistence and a markdown summary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::format_wait;
use crate::history::ResultStatus;
use crate::model::{Mistake, TestQuestion, TestResult};
use crate::scoring::{categorize, mistake_category};

/// A completed session's result, annotated for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReport {
    pub created_at: DateTime<Utc>,
    pub status: ResultStatus,
    pub result: TestResult,
    /// Mistakes grouped by category, in mistake order within each group.
    pub mistakes_by_category: BTreeMap<String, Vec<Mistake>>,
}

impl ResultReport {
    /// Build a report; `questions` resolves mistake categories and may be
    /// empty, in which case categories come from the prompt text alone.
    pub fn new(result: TestResult, questions: &[TestQuestion]) -> Self {
        let mut result = result;
        if result.details.error_analysis.is_none() && !result.mistakes.is_empty() {
            result.details.error_analysis = Some(categorize(questions, &result.mistakes));
        }

        let mut mistakes_by_category: BTreeMap<String, Vec<Mistake>> = BTreeMap::new();
        for mistake in &result.mistakes {
            mistakes_by_category
                .entry(mistake_category(questions, mistake).to_string())
                .or_default()
                .push(mistake.clone());
        }

        Self {
            created_at: Utc::now(),
            status: ResultStatus::from_score(result.score),
            result,
            mistakes_by_category,
        }
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: ResultReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Format the report as markdown.
    pub fn to_markdown(&self) -> String {
        let r = &self.result;
        let mut md = String::new();

        md.push_str(&format!("## {} test result\n\n", r.test_type));
        md.push_str(&format!(
            "**Score:** {}% ({})\n\n",
            r.score, self.status
        ));
        md.push_str(&format!(
            "**Correct:** {} of {}  \n**Completed:** {}  \n**Duration:** {}\n",
            r.details.correct_answers,
            r.details.total_questions,
            r.test_date.format("%Y-%m-%d %H:%M UTC"),
            format_wait(r.duration),
        ));
        if let Some(end) = r.cooldown_end {
            md.push_str(&format!(
                "**Next attempt:** {}\n",
                end.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        md.push('\n');

        if self.mistakes_by_category.is_empty() {
            md.push_str("No mistakes.\n");
            return md;
        }

        md.push_str("### Mistakes\n\n");
        for (category, mistakes) in &self.mistakes_by_category {
            md.push_str(&format!("#### {} ({})\n\n", category, mistakes.len()));
            md.push_str("| Question | Your answer | Correct answer |\n");
            md.push_str("|----------|-------------|----------------|\n");
            for m in mistakes {
                let given = if m.user_answer.is_empty() {
                    "(no answer)"
                } else {
                    m.user_answer.as_str()
                };
                md.push_str(&format!(
                    "| {} | {} | {} |\n",
                    escape_cell(&m.question),
                    escape_cell(given),
                    escape_cell(&m.correct_answer)
                ));
            }
            md.push('\n');
        }

        md
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

//! Read-only views over the user's test history.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cooldown::{CooldownPolicy, CooldownRecord};
use crate::error::ApiError;
use crate::model::{TestHistoryEntry, TestResult};
use crate::traits::TestApi;

/// The most recent history row for `test_type`.
pub fn last_result<'a>(
    entries: &'a [TestHistoryEntry],
    test_type: &str,
) -> Option<&'a TestHistoryEntry> {
    entries
        .iter()
        .filter(|e| e.test_type == test_type)
        .max_by_key(|e| e.test_date)
}

/// Coarse status band for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Passed,
    Warning,
    Failed,
}

impl ResultStatus {
    pub fn from_score(score: u32) -> Self {
        if score >= 85 {
            ResultStatus::Passed
        } else if score >= 70 {
            ResultStatus::Warning
        } else {
            ResultStatus::Failed
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultStatus::Passed => "passed",
            ResultStatus::Warning => "warning",
            ResultStatus::Failed => "failed",
        })
    }
}

/// Per test type overview for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestTypeSummary {
    pub test_type: String,
    pub attempts: usize,
    pub last_score: Option<u32>,
    pub last_date: Option<DateTime<Utc>>,
    pub status: Option<ResultStatus>,
    pub cooldown: CooldownRecord,
}

pub fn summarize(
    entries: &[TestHistoryEntry],
    test_types: &[&str],
    policy: &CooldownPolicy,
    now: DateTime<Utc>,
) -> Vec<TestTypeSummary> {
    test_types
        .iter()
        .map(|test_type| {
            let last = last_result(entries, test_type);
            TestTypeSummary {
                test_type: test_type.to_string(),
                attempts: entries.iter().filter(|e| e.test_type == *test_type).count(),
                last_score: last.map(|e| e.score),
                last_date: last.map(|e| e.test_date),
                status: last.map(|e| ResultStatus::from_score(e.score)),
                cooldown: CooldownRecord::derive(test_type, entries, policy, now),
            }
        })
        .collect()
}

/// Fetch the full result of the latest attempt of each test type.
///
/// Requests run concurrently; types without history are skipped.
pub async fn latest_details(
    api: &dyn TestApi,
    entries: &[TestHistoryEntry],
    test_types: &[&str],
) -> Vec<(String, Result<TestResult, ApiError>)> {
    let requests = test_types.iter().filter_map(|test_type| {
        let last = last_result(entries, test_type)?;
        let test_type = test_type.to_string();
        let id = last.test_id;
        Some(async move { (test_type, api.get_result(id).await) })
    });
    join_all(requests).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(days_ago: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap() - Duration::days(days_ago)
    }

    fn row(id: i64, test_type: &str, score: u32, days_ago: i64) -> TestHistoryEntry {
        TestHistoryEntry {
            test_id: id,
            test_date: at(days_ago),
            test_type: test_type.into(),
            score,
            duration: 90,
            details: serde_json::Value::Null,
            cooldown_end: None,
        }
    }

    #[test]
    fn last_result_picks_latest_date_not_position() {
        let rows = vec![row(2, "memory", 60, 1), row(1, "memory", 90, 5), row(3, "logic", 70, 0)];
        assert_eq!(last_result(&rows, "memory").unwrap().test_id, 2);
        assert!(last_result(&rows, "reaction").is_none());
    }

    #[test]
    fn status_bands() {
        assert_eq!(ResultStatus::from_score(100), ResultStatus::Passed);
        assert_eq!(ResultStatus::from_score(85), ResultStatus::Passed);
        assert_eq!(ResultStatus::from_score(84), ResultStatus::Warning);
        assert_eq!(ResultStatus::from_score(70), ResultStatus::Warning);
        assert_eq!(ResultStatus::from_score(69), ResultStatus::Failed);
    }

    #[test]
    fn summaries_cover_every_requested_type() {
        let rows = vec![row(1, "memory", 90, 3), row(2, "memory", 72, 0)];
        let summaries = summarize(&rows, &["memory", "reaction"], &CooldownPolicy::default(), at(0));

        let memory = &summaries[0];
        assert_eq!(memory.attempts, 2);
        assert_eq!(memory.last_score, Some(72));
        assert_eq!(memory.status, Some(ResultStatus::Warning));
        assert!(memory.cooldown.in_cooldown);

        let reaction = &summaries[1];
        assert_eq!(reaction.attempts, 0);
        assert!(reaction.status.is_none());
        assert!(!reaction.cooldown.in_cooldown);
    }
}

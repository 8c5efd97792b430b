//! Cooldown gating between attempts of the same test type.
//!
//! The authoritative decision belongs to the server; everything here mirrors
//! it locally from the last completion time so a start can be rejected (and
//! the remaining wait displayed) before a request is made.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::history;
use crate::model::{ceil_seconds, TestHistoryEntry};

/// Default cooldown window: 24 hours.
pub const DEFAULT_COOLDOWN_MINUTES: u64 = 1440;

/// Whether a test type can be attempted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub remaining_seconds: u64,
}

impl Availability {
    pub const OPEN: Availability = Availability {
        available: true,
        remaining_seconds: 0,
    };
}

/// Decide availability from the last completion and the window length.
///
/// With no prior completion the test is always available. Otherwise it opens
/// at `last_completion + window_seconds`; the remaining wait is rounded up to
/// whole seconds.
pub fn is_available(
    last_completion: Option<DateTime<Utc>>,
    window_seconds: u64,
    now: DateTime<Utc>,
) -> Availability {
    let Some(last) = last_completion else {
        return Availability::OPEN;
    };
    let end = window_end(last, window_seconds);
    if now >= end {
        Availability::OPEN
    } else {
        Availability {
            available: false,
            remaining_seconds: ceil_seconds(end - now),
        }
    }
}

/// End of a window starting at `start`. Windows past the representable range
/// end at the latest representable instant, keeping the test unavailable.
fn window_end(start: DateTime<Utc>, window_seconds: u64) -> DateTime<Utc> {
    i64::try_from(window_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|window| start.checked_add_signed(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Cooldown windows per test type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    /// Window applied to test types without an override, in minutes.
    #[serde(default = "default_minutes")]
    pub default_minutes: u64,
    /// Per test type overrides, in minutes.
    #[serde(default)]
    pub per_type: HashMap<String, u64>,
}

fn default_minutes() -> u64 {
    DEFAULT_COOLDOWN_MINUTES
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_COOLDOWN_MINUTES,
            per_type: HashMap::new(),
        }
    }
}

impl CooldownPolicy {
    pub fn with_window(mut self, test_type: &str, minutes: u64) -> Self {
        self.per_type.insert(test_type.to_string(), minutes);
        self
    }

    pub fn window_seconds(&self, test_type: &str) -> u64 {
        self.per_type
            .get(test_type)
            .copied()
            .unwrap_or(self.default_minutes)
            .saturating_mul(60)
    }

    pub fn check(
        &self,
        test_type: &str,
        last_completion: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Availability {
        is_available(last_completion, self.window_seconds(test_type), now)
    }

    pub fn cooldown_end(&self, test_type: &str, completed_at: DateTime<Utc>) -> DateTime<Utc> {
        window_end(completed_at, self.window_seconds(test_type))
    }
}

/// Derived cooldown state for one test type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub test_type: String,
    pub last_completion: Option<DateTime<Utc>>,
    pub window_seconds: u64,
    pub in_cooldown: bool,
    pub cooldown_end: Option<DateTime<Utc>>,
}

impl CooldownRecord {
    /// Derive the record from the user's history.
    ///
    /// A `cooldown_end` stored on the latest row wins over the policy window.
    pub fn derive(
        test_type: &str,
        entries: &[TestHistoryEntry],
        policy: &CooldownPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let window_seconds = policy.window_seconds(test_type);
        let last = history::last_result(entries, test_type);
        let last_completion = last.map(|e| e.test_date);
        let cooldown_end = last.map(|e| {
            e.cooldown_end
                .unwrap_or_else(|| policy.cooldown_end(test_type, e.test_date))
        });
        let in_cooldown = cooldown_end.is_some_and(|end| now < end);

        Self {
            test_type: test_type.to_string(),
            last_completion,
            window_seconds,
            in_cooldown,
            cooldown_end,
        }
    }

    pub fn availability(&self, now: DateTime<Utc>) -> Availability {
        match self.cooldown_end {
            Some(end) if now < end => Availability {
                available: false,
                remaining_seconds: ceil_seconds(end - now),
            },
            _ => Availability::OPEN,
        }
    }
}

//! The `cogcheck history` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Table};

use cogcheck_client::config::{create_api, load_config_from};
use cogcheck_core::error::format_wait;
use cogcheck_core::history::{self, ResultStatus};
use cogcheck_core::traits::HistorySource;

const RECENT_LIMIT: usize = 20;

pub async fn execute(
    test_type: Option<String>,
    details: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let api = create_api(&config)?;

    let mut entries = api.history().await.context("failed to load test history")?;
    entries.sort_by(|a, b| b.test_date.cmp(&a.test_date));

    let types: Vec<&str> = match &test_type {
        Some(t) => vec![t.as_str()],
        None => config.test_types.iter().map(String::as_str).collect(),
    };

    let now = Utc::now();
    let mut summary = Table::new();
    summary.set_header(vec![
        "Test",
        "Attempts",
        "Last score",
        "Status",
        "Last taken",
        "Available",
    ]);
    for s in history::summarize(&entries, &types, &config.cooldown, now) {
        let availability = s.cooldown.availability(now);
        summary.add_row(vec![
            Cell::new(&s.test_type),
            Cell::new(s.attempts),
            Cell::new(s.last_score.map_or("-".to_string(), |score| format!("{score}%"))),
            Cell::new(s.status.map_or("-".to_string(), |status| status.to_string())),
            Cell::new(s.last_date.map_or("-".to_string(), |d| {
                d.format("%Y-%m-%d %H:%M").to_string()
            })),
            Cell::new(if availability.available {
                "now".to_string()
            } else {
                format!("in {}", format_wait(availability.remaining_seconds))
            }),
        ]);
    }
    println!("{summary}");

    let recent: Vec<_> = entries
        .iter()
        .filter(|e| test_type.as_ref().map_or(true, |t| &e.test_type == t))
        .take(RECENT_LIMIT)
        .collect();
    if recent.is_empty() {
        println!("\nNo test history yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Date", "Test", "Score", "Status", "Duration"]);
    for e in &recent {
        table.add_row(vec![
            Cell::new(e.test_date.format("%Y-%m-%d %H:%M")),
            Cell::new(&e.test_type),
            Cell::new(format!("{}%", e.score)),
            Cell::new(ResultStatus::from_score(e.score)),
            Cell::new(format_wait(e.duration)),
        ]);
    }
    println!("\n{table}");

    if details {
        for (test_type, result) in history::latest_details(api.as_ref(), &entries, &types).await {
            match result {
                Ok(result) if result.mistakes.is_empty() => {
                    println!("\n{test_type}: no mistakes in the last attempt");
                }
                Ok(result) => {
                    println!("\n{test_type}: {} mistake(s) in the last attempt", result.mistakes.len());
                    for m in &result.mistakes {
                        println!("  - {} (answered '{}', expected '{}')", m.question, m.user_answer, m.correct_answer);
                    }
                }
                Err(e) => eprintln!("\n{test_type}: could not load details: {e}"),
            }
        }
    }

    Ok(())
}

//! The `cogcheck validate` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::Table;

use cogcheck_core::model::VariantFamily;
use cogcheck_core::parser::{self, QuestionSet, ValidationWarning};

pub fn execute(question_set_path: PathBuf) -> Result<()> {
    let sets = if question_set_path.is_dir() {
        parser::load_question_directory(&question_set_path)?
    } else {
        vec![parser::parse_question_set(&question_set_path)?]
    };
    anyhow::ensure!(
        !sets.is_empty(),
        "no question sets found in {}",
        question_set_path.display()
    );

    let mut found: Vec<(String, ValidationWarning)> = Vec::new();
    for set in &sets {
        println!(
            "Question set: {} [{}] ({} questions, {}s limit; {})",
            set.name,
            set.test_type,
            set.questions.len(),
            set.time_limit_secs,
            family_breakdown(set)
        );
        found.extend(
            parser::validate_question_set(set)
                .into_iter()
                .map(|w| (set.name.clone(), w)),
        );
    }

    if found.is_empty() {
        println!("All question sets valid.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Set", "Question", "Warning"]);
    for (set, w) in &found {
        table.add_row(vec![
            set.as_str(),
            w.question_id.as_deref().unwrap_or("-"),
            w.message.as_str(),
        ]);
    }
    println!("\n{table}");
    println!("{} warning(s) found.", found.len());

    Ok(())
}

fn family_breakdown(set: &QuestionSet) -> String {
    let (mut recall, mut reaction, mut direct) = (0, 0, 0);
    for q in &set.questions {
        match q.kind.family() {
            VariantFamily::Recall => recall += 1,
            VariantFamily::Reaction(_) => reaction += 1,
            VariantFamily::Direct => direct += 1,
        }
    }
    format!("{recall} recall, {reaction} reaction, {direct} direct")
}

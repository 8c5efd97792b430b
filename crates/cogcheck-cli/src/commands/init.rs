//! The `cogcheck init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("cogcheck.toml").exists() {
        println!("cogcheck.toml already exists, skipping.");
    } else {
        std::fs::write("cogcheck.toml", SAMPLE_CONFIG)?;
        println!("Created cogcheck.toml");
    }

    std::fs::create_dir_all("question-sets")?;
    let example_path = Path::new("question-sets/example.toml");
    if example_path.exists() {
        println!("question-sets/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_QUESTION_SET)?;
        println!("Created question-sets/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Set COGCHECK_TOKEN or edit the token in cogcheck.toml");
    println!("  2. Run: cogcheck validate --question-set question-sets/example.toml");
    println!("  3. Practice offline: cogcheck run --test-type cognitive --offline question-sets");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# cogcheck configuration

base_url = "http://localhost:5000/api"
token = "${COGCHECK_TOKEN}"
request_timeout_secs = 30
test_types = ["attention", "reaction", "memory", "cognitive"]

[cooldown]
default_minutes = 1440

[cooldown.per_type]
reaction = 720

[session]
stimulus_jitter_ms = 500
response_window_ms = 3000
tick_ms = 1000

[scoring]
min_reaction_ms = 100
max_reaction_ms = 1000
no_go_policy = "incorrect"
"#;

const EXAMPLE_QUESTION_SET: &str = r#"[set]
test_type = "cognitive"
name = "Example cognitive check"
description = "A short mixed set to get started"
time_limit_secs = 180

[[questions]]
id = "logic-1"
type = "logic"
question = "All pilots hold a licence. Maria is a pilot. Does Maria hold a licence?"
options = ["yes", "no", "cannot tell"]
correct_answer = "yes"

[[questions]]
id = "math-1"
type = "math"
question = "A climb of 500 ft per minute for 6 minutes gains how many feet?"
correct_answer = "3000"

[[questions]]
id = "words-1"
type = "words"
question = "Remember: heading, flaps, squawk"
question_text = "Which words were shown?"
delay = 3
options = ["heading", "rudder", "flaps", "squawk", "throttle"]
correct_answer = "flaps,heading,squawk"
"#;

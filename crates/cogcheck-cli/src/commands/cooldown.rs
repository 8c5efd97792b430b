//! The `cogcheck cooldown` command.

use std::path::PathBuf;

use anyhow::Result;

use cogcheck_client::config::{load_config_from, session_controller};
use cogcheck_core::error::{format_wait, SessionError};

pub async fn execute(test_type: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let controller = session_controller(&config)?;

    match controller.check_availability(&test_type).await {
        Ok(_) => println!("{test_type}: available now"),
        Err(SessionError::Ineligible {
            remaining_seconds,
            cooldown_end,
            ..
        }) => {
            let at = cooldown_end
                .map(|end| format!(" (at {})", end.format("%Y-%m-%d %H:%M UTC")))
                .unwrap_or_default();
            println!(
                "{test_type}: next attempt in {}{at}",
                format_wait(remaining_seconds)
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

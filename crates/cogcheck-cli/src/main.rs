//! cogcheck CLI — run cognitive test sessions from the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "cogcheck", version, about = "Pilot cognitive test runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a test session
    Run {
        /// Test type to take (e.g. attention, reaction, memory, cognitive)
        #[arg(long)]
        test_type: String,

        /// Serve questions from a local question-set file or directory instead of the API
        #[arg(long)]
        offline: Option<PathBuf>,

        /// Save the result report as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate question-set TOML files
    Validate {
        /// Path to question-set file or directory
        #[arg(long)]
        question_set: PathBuf,
    },

    /// Show past results and per-type status
    History {
        /// Only show attempts of this test type
        #[arg(long)]
        test_type: Option<String>,

        /// Also list the mistakes of the latest attempt per test type
        #[arg(long)]
        details: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check whether a test type can be taken now
    Cooldown {
        #[arg(long)]
        test_type: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example question set
    Init,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cogcheck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            test_type,
            offline,
            output,
            config,
        } => commands::run::execute(test_type, offline, output, config).await,
        Commands::Validate { question_set } => commands::validate::execute(question_set),
        Commands::History {
            test_type,
            details,
            config,
        } => commands::history::execute(test_type, details, config).await,
        Commands::Cooldown { test_type, config } => {
            commands::cooldown::execute(test_type, config).await
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "quotewatch",
    about = "Quotewatch operator CLI",
    long_about = "Inspect configuration, check runtime readiness, apply migrations, and dry-run the business-hours and checklist rules.",
    after_help = "Examples:\n  quotewatch doctor --json\n  quotewatch hours 2026-03-06T16:00:00 2026-03-09T11:00:00\n  quotewatch checklist \"segue o orçamento, frete incluso\""
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file to load instead of the default search")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, classifier and gateway setup, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Count business hours between two timestamps in the configured window")]
    Hours {
        #[arg(help = "Start instant (RFC 3339, or local time in the SLA timezone)")]
        start: String,
        #[arg(help = "End instant (RFC 3339, or local time in the SLA timezone)")]
        end: String,
    },
    #[command(about = "Run the closure and custom-order checklists against a draft message")]
    Checklist {
        #[arg(help = "Message text to check")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(config_path),
        Command::Config => commands::config::run(config_path),
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(config_path, json);
            commands::CommandResult { exit_code, output }
        }
        Command::Hours { start, end } => commands::hours::run(config_path, &start, &end),
        Command::Checklist { text } => commands::checklist::run(config_path, &text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "callhook",
    about = "CallHook operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness and list scheduled follow-up work.",
    after_help = "Examples:\n  callhook doctor --json\n  callhook config\n  callhook actions --state pending --limit 20"
)]
pub struct Cli {
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
    #[command(about = "Validate config, provider credentials and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List delayed actions (follow-ups, review requests, owner nudges)")]
    Actions {
        #[arg(long, default_value = "pending", help = "pending|claimed|fired|cancelled|failed|all")]
        state: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Actions { state, limit } => commands::actions::run(&state, limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence operator CLI",
    long_about = "Operate Cadence migrations, readiness checks, config inspection, and single-turn workflow runs.",
    after_help = "Examples:\n  cadence doctor --json\n  cadence config\n  cadence chat --thread user_34600000000 \"how much is the premium plan?\""
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
    #[command(about = "Validate config, database connectivity, and inference endpoint readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one workflow turn against an in-memory checkpoint and print the reply")]
    Chat {
        #[arg(long, help = "Thread key the turn belongs to", default_value = "user_cli")]
        thread: String,
        #[arg(help = "User message text", required = true, num_args = 1..)]
        text: Vec<String>,
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
        Command::Chat { thread, text } => commands::chat::run(&thread, &text.join(" ")),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

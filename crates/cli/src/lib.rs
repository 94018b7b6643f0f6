pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ratify",
    about = "Ratify approval workflow CLI",
    long_about = "Operate the Ratify approval workflow engine: migrations, catalog seeds, \
                  subject submission, approval decisions, grading workers, and cleanup sweeps.",
    after_help = "Examples:\n  ratify doctor --json\n  ratify submit --subject 7e57ab1e-...\n  ratify worker --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic catalog seed and verify its contract")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, grading source readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Submit a subject into its approval flow")]
    Submit {
        #[arg(long, help = "Subject id (UUID)")]
        subject: String,
    },
    #[command(about = "Record an approval or rejection against a subject's chain")]
    Decide {
        #[arg(long, help = "Subject id (UUID)")]
        subject: String,
        #[arg(long, help = "Acting user id")]
        user: String,
        #[arg(long, help = "Role held by the acting user; repeatable")]
        role: Vec<String>,
        #[arg(long, help = "Decision to record: approve or reject")]
        action: String,
        #[arg(long, help = "Optional remarks attached to the decision")]
        remarks: Option<String>,
    },
    #[command(about = "List a subject's approval chain in step order")]
    Chain {
        #[arg(long, help = "Subject id (UUID)")]
        subject: String,
        #[arg(long, help = "Only entries with this status (pending|approved|rejected)")]
        status: Option<String>,
    },
    #[command(about = "Claim and run due grading tasks once, then exit")]
    Worker {
        #[arg(long, default_value_t = 20, help = "Maximum tasks to claim in this pass")]
        limit: u32,
    },
    #[command(about = "Purge subjects abandoned in their initial status")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Submit { subject } => commands::submit::run(&subject),
        Command::Decide { subject, user, role, action, remarks } => {
            commands::decide::run(&subject, &user, &role, &action, remarks)
        }
        Command::Chain { subject, status } => commands::chain::run(&subject, status.as_deref()),
        Command::Worker { limit } => commands::worker::run(limit),
        Command::Sweep => commands::sweep::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

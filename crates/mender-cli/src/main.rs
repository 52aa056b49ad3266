mod cmd_config;
mod cmd_execute;
mod cmd_init;
mod cmd_intake;
mod cmd_log;
mod cmd_review;
mod render;
mod workspace;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mender", version, about = "Human-in-the-loop incident remediation")]
struct Cli {
    /// Log progress of every stage (overridden by MENDER_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new .mender/ workspace
    Init,
    /// Open an incident from a YAML file, gather context and analyze it
    Intake {
        /// Incident file (id, title, severity, environment, application, host, tags)
        file: PathBuf,
    },
    /// Show one incident, rebuilt from the audit log
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List incidents and their lifecycle state
    List,
    /// Dry-run the proposed plan without touching the target
    Simulate { id: String },
    /// Approve, modify or reject the proposed plan
    Decide {
        id: String,
        #[arg(value_enum)]
        verdict: cmd_review::Verdict,
        /// Why this decision was taken
        #[arg(long)]
        rationale: String,
        /// Acknowledge a high-risk action (repeatable)
        #[arg(long = "ack")]
        acks: Vec<String>,
        /// Replace an action's command, as ID=COMMAND (repeatable)
        #[arg(long = "edit")]
        edits: Vec<String>,
        /// Skip the execution-time dry run if the review dry run covers the plan
        #[arg(long)]
        confirm_dry_run: bool,
        /// Reviewer identity (defaults to the configured actor)
        #[arg(long)]
        actor: Option<String>,
    },
    /// Execute the approved plan (Ctrl-C halts before the next action)
    Execute { id: String },
    /// Settle an execution that was interrupted (crash or audit outage)
    Recover { id: String },
    /// Run the rollback command of a failed execution
    Rollback {
        id: String,
        #[arg(long)]
        rationale: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Print the audit trail of an incident
    Log {
        id: String,
        /// One JSON entry per line
        #[arg(long)]
        json: bool,
    },
    /// Verify the hash chain and replay of an incident
    Verify { id: String },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,mender=info,mender_conductor=info,mender_ledger=info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("MENDER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let repo_root = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => cmd_init::execute(&repo_root),
        Command::Intake { file } => cmd_intake::execute(&repo_root, &file),
        Command::Show { id, json } => cmd_review::show(&repo_root, &id, json),
        Command::List => cmd_review::list(&repo_root),
        Command::Simulate { id } => cmd_review::simulate(&repo_root, &id),
        Command::Decide {
            id,
            verdict,
            rationale,
            acks,
            edits,
            confirm_dry_run,
            actor,
        } => cmd_review::decide(cmd_review::DecideParams {
            repo_root: &repo_root,
            id: &id,
            verdict,
            rationale: &rationale,
            acks: &acks,
            edits: &edits,
            confirm_dry_run,
            actor: actor.as_deref(),
        }),
        Command::Execute { id } => cmd_execute::execute(&repo_root, &id),
        Command::Recover { id } => cmd_execute::recover(&repo_root, &id),
        Command::Rollback {
            id,
            rationale,
            actor,
        } => cmd_execute::rollback(&repo_root, &id, &rationale, actor.as_deref()),
        Command::Log { id, json } => cmd_log::execute(&repo_root, &id, json),
        Command::Verify { id } => cmd_log::verify(&repo_root, &id),
        Command::Config { cmd } => cmd_config::run(cmd, &repo_root),
    }
}

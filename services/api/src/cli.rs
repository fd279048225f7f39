use crate::commands::{
    run_calibration_stats, run_rules_activate, run_rules_publish, run_rules_resolve,
    run_triage_score, ActivateArgs, PublishArgs, ResolveArgs, StatsArgs, TriageScoreArgs,
};
use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use triage_engine::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Triage Decision Engine",
    about = "Run and inspect the clinical triage decision engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect, publish, and activate rule packs
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Score an assessment without starting the server
    Triage {
        #[command(subcommand)]
        command: TriageCommand,
    },
    /// Offline views over exported clinician feedback
    Calibration {
        #[command(subcommand)]
        command: CalibrationCommand,
    },
    /// Walk through resolution, triage, feedback, and calibration end to end
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Resolve the rule pack that covers a topic
    Resolve(ResolveArgs),
    /// Write a rule pack JSON file into storage as a new immutable artifact
    Publish(PublishArgs),
    /// Point the community tier at a published version
    Activate(ActivateArgs),
}

#[derive(Subcommand, Debug)]
enum TriageCommand {
    /// Score a JSON assessment file, optionally with a topic's rules
    Score(TriageScoreArgs),
}

#[derive(Subcommand, Debug)]
enum CalibrationCommand {
    /// De-identified coverage, diagnosis, and rollup stats from a feedback CSV
    Stats(StatsArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the rule pack storage root
    #[arg(long)]
    pub(crate) rule_pack_root: Option<PathBuf>,
    /// Seed feedback history from a CSV export
    #[arg(long)]
    pub(crate) feedback_csv: Option<PathBuf>,
    /// Run a calibration decay pass every N hours
    #[arg(long)]
    pub(crate) decay_every_hours: Option<u64>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rules { command } => match command {
            RulesCommand::Resolve(args) => run_rules_resolve(args),
            RulesCommand::Publish(args) => run_rules_publish(args),
            RulesCommand::Activate(args) => run_rules_activate(args),
        },
        Command::Triage {
            command: TriageCommand::Score(args),
        } => run_triage_score(args),
        Command::Calibration {
            command: CalibrationCommand::Stats(args),
        } => run_calibration_stats(args),
        Command::Demo(args) => run_demo(args).await,
    }
}

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::{
    dispatch::{self, DispatchArgs},
    evaluate::{self, EvaluateArgs},
    gridgen::{self, GridgenArgs},
    resubmit::{self, ResubmitArgs},
    scanlogs::{self, ScanlogsArgs},
    status::{self, StatusArgs},
    CommandResult, Outcome,
};
use frs_core::FrsError;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(name = "frs", about = "Grid search orchestrator for fake-rate measurements")]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate the grid and provision one working directory per point.
    Gridgen(GridgenArgs),
    /// Submit one stage for every (or the selected) grid point.
    Dispatch(DispatchArgs),
    /// Classify task logs below a directory.
    Scanlogs(ScanlogsArgs),
    /// Resubmit unfinished and errored tasks with their logged arguments.
    Resubmit(ResubmitArgs),
    /// Score the grid against the closure artifacts and write the scoreboard.
    Evaluate(EvaluateArgs),
    /// Show per point, per stage task progress.
    Status(StatusArgs),
}

fn run(cli: &Cli) -> CommandResult {
    match &cli.command {
        Command::Gridgen(args) => gridgen::run(args),
        Command::Dispatch(args) => dispatch::run(args),
        Command::Scanlogs(args) => scanlogs::run(args),
        Command::Resubmit(args) => resubmit::run(args),
        Command::Evaluate(args) => evaluate::run(args),
        Command::Status(args) => status::run(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str().to_lowercase())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::TasksFailed) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            let code = err
                .downcast_ref::<FrsError>()
                .map(FrsError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

use std::path::PathBuf;

use clap::Args;
use frs_core::FrsError;
use frs_logs::{scan, Protocol, ScanOptions};

use super::{CommandResult, Outcome};
use crate::config::RunConfig;

#[derive(Args, Debug)]
pub struct ScanlogsArgs {
    /// Directory to scan recursively for task logs.
    #[arg(long)]
    pub dir: PathBuf,
    /// Campaign configuration supplying markers, fatal patterns and check defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Skip legacy `<name>.e<job>` logs.
    #[arg(long, default_value_t = false)]
    pub no_qsub_logs: bool,
    /// Skip cluster `<base>_err_<cluster>_<process>` logs.
    #[arg(long, default_value_t = false)]
    pub no_cluster_logs: bool,
    /// Do not compare start and completion markers.
    #[arg(long, default_value_t = false)]
    pub no_markers: bool,
    /// Do not search for fatal error text.
    #[arg(long, default_value_t = false)]
    pub no_error_tags: bool,
    /// Emit the full report as JSON instead of a listing.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn run(args: &ScanlogsArgs) -> CommandResult {
    let (mut options, protocol) = match &args.config {
        Some(path) => {
            let config = RunConfig::load(path)?;
            (config.scan.options(), config.protocol.protocol())
        }
        None => (ScanOptions::default(), Protocol::default()),
    };
    options.check_qsub_logs &= !args.no_qsub_logs;
    options.check_cluster_logs &= !args.no_cluster_logs;
    options.check_markers &= !args.no_markers;
    options.check_error_tags &= !args.no_error_tags;

    let report = scan(&args.dir, &options, &protocol)?;
    let summary = report.summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &report.entries {
            match &entry.outcome {
                Ok(outcome) if outcome.is_completed() => {}
                Ok(outcome) => match entry.task_error() {
                    Some(FrsError::TaskErrored(_)) => {
                        println!("{}: {outcome} [may be systematic]", entry.log.display())
                    }
                    _ => println!("{}: {outcome}", entry.log.display()),
                },
                Err(failure) => println!("{}: unreadable ({})", entry.log.display(), failure.message),
            }
        }
        for failure in &report.skipped {
            println!("skipped: {}", failure.message);
        }
        println!(
            "{} log(s) scanned: {} clean, {} unfinished, {} errored, {} unreadable, {} skipped",
            summary.scanned,
            summary.clean,
            summary.unfinished,
            summary.errored,
            summary.unreadable,
            summary.skipped
        );
    }
    if summary.failed() > 0 || summary.skipped > 0 {
        Ok(Outcome::TasksFailed)
    } else {
        Ok(Outcome::Success)
    }
}

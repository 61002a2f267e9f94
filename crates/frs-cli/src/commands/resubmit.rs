use std::path::PathBuf;

use clap::Args;
use frs_batch::{execute, load_descriptors, plan_all};

use super::{Campaign, CommandResult, Outcome};

#[derive(Args, Debug)]
pub struct ResubmitArgs {
    /// Campaign configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Grid root created by `frs gridgen`.
    #[arg(long)]
    pub grid: PathBuf,
    /// List the tasks that would be resubmitted and stop.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run(args: &ResubmitArgs) -> CommandResult {
    let campaign = Campaign::open(&args.config, &args.grid)?;
    let submit_dir = campaign.submit_dir();
    let descriptors = load_descriptors(&submit_dir, false)?;
    let report = campaign.scan()?;
    let plans = plan_all(&report, &descriptors);

    let mut skipped = 0;
    for plan in &plans {
        println!(
            "{}: {} task(s) to resubmit, {} unrecoverable",
            plan.descriptor_path.display(),
            plan.tasks.len(),
            plan.skipped.len()
        );
        for task in &plan.tasks {
            println!("    {} [{}] {}", task.log.display(), task.outcome, task.arguments.join(" "));
        }
        for skip in &plan.skipped {
            println!("    {} skipped: {}", skip.log.display(), skip.error);
        }
        skipped += plan.skipped.len();
    }
    if plans.is_empty() {
        println!("no failed tasks found under {}", campaign.root().display());
        return Ok(Outcome::Success);
    }
    if args.dry_run {
        return Ok(if skipped > 0 {
            Outcome::TasksFailed
        } else {
            Outcome::Success
        });
    }

    let mut scheduler = campaign.scheduler()?;
    let mut resubmitted = 0;
    for plan in &plans {
        if let Some(receipt) = execute(plan, scheduler.as_mut(), &submit_dir)? {
            let clusters: Vec<String> = receipt.clusters.iter().map(u64::to_string).collect();
            println!(
                "resubmitted {} task(s) as cluster(s) {}; {} original job(s) removed",
                receipt.resubmitted,
                clusters.join(", "),
                receipt.cancelled
            );
            resubmitted += receipt.resubmitted;
        }
    }
    println!("{resubmitted} task(s) resubmitted, {skipped} unrecoverable");
    if skipped > 0 {
        Ok(Outcome::TasksFailed)
    } else {
        Ok(Outcome::Success)
    }
}

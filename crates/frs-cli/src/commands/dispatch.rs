use std::path::PathBuf;

use clap::Args;
use frs_batch::{dispatch, group_tasks, StageGate};
use frs_grid::{Stage, Task};
use tracing::warn;

use super::{Campaign, CommandResult, Outcome};

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Campaign configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Grid root created by `frs gridgen`.
    #[arg(long)]
    pub grid: PathBuf,
    /// Stage to dispatch (measurement-fill, map-derivation, closure-test).
    #[arg(long)]
    pub stage: Stage,
    /// Restrict to these point ids.
    #[arg(long = "point", value_name = "ID")]
    pub points: Vec<String>,
    /// Dispatch even when the previous stage is not complete.
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// Print the submissions without contacting the scheduler.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run(args: &DispatchArgs) -> CommandResult {
    let campaign = Campaign::open(&args.config, &args.grid)?;
    let descriptors = campaign.descriptors()?;
    let report = campaign.scan()?;
    let gate = StageGate::new(
        &campaign.config.stages,
        campaign.root(),
        &campaign.shards,
        &descriptors,
        &report,
    );

    let mut tasks: Vec<Task> = Vec::new();
    let mut blocked = 0;
    let mut already = 0;
    for point in campaign.select_points(&args.points)? {
        if !gate.ready(point, args.stage)? {
            if let Some(previous) = args.stage.previous() {
                let progress = gate.progress(point, previous)?;
                if !args.force {
                    println!(
                        "blocked  {}: {previous} {}/{} complete",
                        point.id, progress.completed, progress.total
                    );
                    blocked += 1;
                    continue;
                }
                warn!(point = %point.id, %previous, "previous stage incomplete; forced");
            }
        }
        for task in gate.tasks(point, args.stage)? {
            if gate.is_dispatched(&task) {
                already += 1;
            } else {
                tasks.push(task);
            }
        }
    }
    if already > 0 {
        println!("{already} task(s) already dispatched; use `frs resubmit` for failures");
    }

    if args.dry_run {
        for group in group_tasks(&tasks) {
            println!(
                "would submit {} task(s) of {} (arity {})",
                group.len(),
                group[0].executable,
                group[0].arity()
            );
            for task in group {
                println!("    {} {}", task.point_id, task.arguments.join(" "));
            }
        }
        println!("{} task(s) planned, {blocked} point(s) blocked", tasks.len());
        return Ok(Outcome::Success);
    }

    let mut scheduler = campaign.scheduler()?;
    let receipt = dispatch(
        &tasks,
        scheduler.as_mut(),
        &campaign.config.submit,
        &campaign.submit_dir(),
    )?;
    for submission in &receipt.submissions {
        println!(
            "cluster {}: {} task(s) of {} -> {}",
            submission.cluster,
            submission.tasks.len(),
            submission.executable,
            submission.descriptor.display()
        );
    }
    println!(
        "{} task(s) dispatched in {} submission(s), {blocked} point(s) blocked",
        receipt.task_count(),
        receipt.submissions.len()
    );
    Ok(Outcome::Success)
}

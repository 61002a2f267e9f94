use std::path::PathBuf;

use clap::Args;
use frs_batch::{StageGate, StageProgress};
use frs_grid::Stage;

use super::{Campaign, CommandResult, Outcome};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Campaign configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Grid root created by `frs gridgen`.
    #[arg(long)]
    pub grid: PathBuf,
    /// Restrict to these point ids.
    #[arg(long = "point", value_name = "ID")]
    pub points: Vec<String>,
    /// Emit the progress rows as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn run(args: &StatusArgs) -> CommandResult {
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

    let mut rows: Vec<StageProgress> = Vec::new();
    for point in campaign.select_points(&args.points)? {
        for stage in Stage::ALL {
            rows.push(gate.progress(point, stage)?);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        let width = rows.iter().map(|row| row.point_id.len()).max().unwrap_or(5).max(5);
        println!(
            "{:<width$}  {:<16} {:>5} {:>5} {:>6} {:>7} {:>7}",
            "point", "stage", "total", "done", "failed", "pending", "not-run"
        );
        for row in &rows {
            println!(
                "{:<width$}  {:<16} {:>5} {:>5} {:>6} {:>7} {:>7}",
                row.point_id,
                row.stage.as_str(),
                row.total,
                row.completed,
                row.failed,
                row.pending,
                row.undispatched
            );
        }
        let complete = rows.iter().filter(|row| row.is_complete()).count();
        println!("{complete}/{} stage set(s) complete", rows.len());
    }

    if rows.iter().any(|row| row.failed > 0) {
        Ok(Outcome::TasksFailed)
    } else {
        Ok(Outcome::Success)
    }
}

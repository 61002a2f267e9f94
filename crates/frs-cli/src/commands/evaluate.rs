use std::path::PathBuf;

use clap::Args;
use frs_eval::{evaluate, write_scoreboard, HeatmapConfig, JsonArtifactStore, Metric};

use super::{Campaign, CommandResult, Outcome};

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Campaign configuration (YAML) with an `evaluation` section.
    #[arg(long)]
    pub config: PathBuf,
    /// Grid root created by `frs gridgen`.
    #[arg(long)]
    pub grid: PathBuf,
    /// Output directory for the scoreboard.
    #[arg(long)]
    pub out: PathBuf,
    /// Override the configured divergence (chi2 or kl).
    #[arg(long)]
    pub metric: Option<Metric>,
    /// Number of ranked points to print.
    #[arg(long, default_value_t = 5)]
    pub top: usize,
}

pub fn run(args: &EvaluateArgs) -> CommandResult {
    let campaign = Campaign::open(&args.config, &args.grid)?;
    let mut spec = campaign.config.evaluation()?.clone();
    if let Some(metric) = args.metric {
        spec.metric = metric;
    }
    let store = JsonArtifactStore::new(campaign.root());
    let board = evaluate(
        &campaign.grid.points,
        &campaign.grid.grid,
        campaign.root(),
        &spec,
        &store,
    )?;
    let written = write_scoreboard(&board, &args.out, &HeatmapConfig::default())?;
    for path in &written {
        println!("wrote {}", path.display());
    }

    println!("ranking by summed {}:", board.metric);
    for rank in board.ranking().iter().take(args.top) {
        println!(
            "  {:>3}. {} total={:.6} failed={}",
            rank.rank, rank.point_id, rank.total, rank.failed
        );
    }
    match board.best() {
        Some(best) => println!("best point: {} ({:.6})", best.point_id, best.total),
        None => println!("no point has a complete set of scores"),
    }
    println!(
        "{} table(s), {} failed entr{}",
        board.tables.len(),
        board.failed_count(),
        if board.failed_count() == 1 { "y" } else { "ies" }
    );
    Ok(Outcome::Success)
}

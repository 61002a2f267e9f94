use std::fs;
use std::path::PathBuf;

use clap::Args;
use frs_core::io_error;
use frs_grid::{generate, provision};

use super::{canonical_root, CommandResult, Outcome};
use crate::config::RunConfig;

#[derive(Args, Debug)]
pub struct GridgenArgs {
    /// Campaign configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Grid root receiving one working directory per point.
    #[arg(long)]
    pub grid: PathBuf,
    /// Remove and recreate directories that already exist.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

pub fn run(args: &GridgenArgs) -> CommandResult {
    let config = RunConfig::load(&args.config)?;
    fs::create_dir_all(&args.grid).map_err(|err| io_error("grid_root", &args.grid, err))?;
    let root = canonical_root(&args.grid)?;
    let points = generate(&config.grid)?;
    let report = provision(&config.grid, &points, &root, args.force)?;
    for id in &report.created {
        println!("created  {id}");
    }
    for id in &report.skipped {
        println!("exists   {id}");
    }
    println!(
        "{} point(s): {} created, {} already provisioned under {}",
        points.len(),
        report.created.len(),
        report.skipped.len(),
        root.display()
    );
    Ok(Outcome::Success)
}

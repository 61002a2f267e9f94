use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use frs_batch::{load_descriptors, Scheduler, SchedulerSpec, SubmissionDescriptor, SUBMISSIONS_DIR};
use frs_core::{ErrorInfo, FrsError};
use frs_grid::{load_grid, GridPoint, LoadedGrid, SampleListShards};
use frs_logs::{scan, ScanReport};

use crate::config::RunConfig;

pub mod dispatch;
pub mod evaluate;
pub mod gridgen;
pub mod resubmit;
pub mod scanlogs;
pub mod status;

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// At least one task is unfinished, errored or unrecoverable.
    TasksFailed,
}

pub type CommandResult = Result<Outcome, Box<dyn Error>>;

/// Configuration plus the provisioned grid it refers to.
pub struct Campaign {
    pub config: RunConfig,
    pub grid: LoadedGrid,
    pub shards: SampleListShards,
}

impl Campaign {
    /// Loads the configuration and the grid manifest below `grid_root`,
    /// checking that both describe the same axes.
    pub fn open(config_path: &Path, grid_root: &Path) -> Result<Self, FrsError> {
        let config = RunConfig::load(config_path)?;
        let root = canonical_root(grid_root)?;
        let grid = load_grid(&root, Some(&config.grid))?;
        let shards = SampleListShards::new(&config.base_dir);
        Ok(Self {
            config,
            grid,
            shards,
        })
    }

    pub fn root(&self) -> &Path {
        &self.grid.root
    }

    pub fn submit_dir(&self) -> PathBuf {
        self.grid.root.join(SUBMISSIONS_DIR)
    }

    pub fn descriptors(&self) -> Result<Vec<SubmissionDescriptor>, FrsError> {
        Ok(load_descriptors(&self.submit_dir(), false)?
            .into_iter()
            .map(|(_, descriptor)| descriptor)
            .collect())
    }

    /// Scheduler client for this campaign. The dry-run backend continues
    /// numbering after the highest cluster already recorded so repeated
    /// invocations never reuse log names.
    pub fn scheduler(&self) -> Result<Box<dyn Scheduler>, FrsError> {
        let SchedulerSpec::DryRun {
            convention,
            first_cluster,
        } = &self.config.scheduler
        else {
            return Ok(self.config.scheduler.build());
        };
        let recorded = load_descriptors(&self.submit_dir(), true)?
            .iter()
            .filter_map(|(_, descriptor)| descriptor.cluster)
            .max();
        let first = recorded.map_or(*first_cluster, |last| (last + 1).max(*first_cluster));
        Ok(SchedulerSpec::DryRun {
            convention: *convention,
            first_cluster: first,
        }
        .build())
    }

    pub fn scan(&self) -> Result<ScanReport, FrsError> {
        scan(
            self.root(),
            &self.config.scan.options(),
            &self.config.protocol.protocol(),
        )
    }

    /// Points selected by `ids`, or every point when `ids` is empty.
    pub fn select_points(&self, ids: &[String]) -> Result<Vec<&GridPoint>, FrsError> {
        if ids.is_empty() {
            return Ok(self.grid.points.iter().collect());
        }
        ids.iter()
            .map(|id| {
                self.grid.point(id).ok_or_else(|| {
                    FrsError::Config(
                        ErrorInfo::new("point_unknown", "no such grid point")
                            .with_context("point", id.as_str()),
                    )
                })
            })
            .collect()
    }
}

/// Absolute form of an existing grid root.
pub fn canonical_root(path: &Path) -> Result<PathBuf, FrsError> {
    fs::canonicalize(path).map_err(|err| {
        FrsError::Config(
            ErrorInfo::new("grid_root", err.to_string())
                .with_context("path", path.display().to_string())
                .with_hint("run `frs gridgen` first"),
        )
    })
}

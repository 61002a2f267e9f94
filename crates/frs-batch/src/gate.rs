//! Stage readiness.
//!
//! A stage may start at a grid point only once every task of the previous
//! stage at that point has a completed error log. Task lists are
//! re-synthesized rather than stored, so a stage without tasks (zero input
//! shards) is complete by construction.

use std::collections::HashMap;
use std::path::Path;

use frs_core::FrsError;
use frs_grid::{synthesize, GridPoint, ShardSource, Stage, StageTable, Task};
use frs_logs::{LogOutcome, ScanEntry, ScanReport};
use serde::{Deserialize, Serialize};

use crate::descriptor::{SubmissionDescriptor, SubmissionRow};

/// Where one task stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TaskState {
    /// No submission covers the task.
    Undispatched,
    /// Submitted, but no error log has been scanned yet.
    Pending,
    /// The log could not be read.
    Unreadable,
    /// Scanned with the given outcome.
    Scanned {
        /// Classification of the error log.
        outcome: LogOutcome,
    },
}

/// Per-state task counts of one stage at one point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Point the counts belong to.
    pub point_id: String,
    /// Stage the counts belong to.
    pub stage: Stage,
    /// Tasks the stage runs.
    pub total: usize,
    /// Tasks with a completed log.
    pub completed: usize,
    /// Unfinished or errored tasks.
    pub failed: usize,
    /// Submitted tasks without a scanned log, unreadable logs included.
    pub pending: usize,
    /// Tasks never submitted.
    pub undispatched: usize,
}

impl StageProgress {
    /// True when every task completed. Vacuously true without tasks.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Joins synthesized tasks with persisted descriptors and a scan report.
pub struct StageGate<'a> {
    stages: &'a StageTable,
    grid_root: &'a Path,
    shards: &'a dyn ShardSource,
    rows: Vec<(&'a SubmissionDescriptor, &'a SubmissionRow)>,
    entries: HashMap<&'a Path, &'a ScanEntry>,
}

impl<'a> StageGate<'a> {
    /// Indexes `descriptors` (original submissions only) and `report`.
    pub fn new(
        stages: &'a StageTable,
        grid_root: &'a Path,
        shards: &'a dyn ShardSource,
        descriptors: &'a [SubmissionDescriptor],
        report: &'a ScanReport,
    ) -> Self {
        let rows = descriptors
            .iter()
            .filter(|d| d.resubmission_of.is_none())
            .flat_map(|d| d.rows.iter().map(move |row| (d, row)))
            .collect();
        let entries = report
            .entries
            .iter()
            .map(|entry| (entry.log.as_path(), entry))
            .collect();
        Self {
            stages,
            grid_root,
            shards,
            rows,
            entries,
        }
    }

    /// Tasks `stage` runs at `point`.
    pub fn tasks(&self, point: &GridPoint, stage: Stage) -> Result<Vec<Task>, FrsError> {
        synthesize(point, stage, self.stages, self.grid_root, self.shards)
    }

    /// State of one task.
    pub fn task_state(&self, task: &Task) -> TaskState {
        let Some((descriptor, row)) = self
            .rows
            .iter()
            .find(|(d, row)| row.matches_task(&d.executable, task))
        else {
            return TaskState::Undispatched;
        };
        let Some(err_log) = row.log_paths(descriptor.convention).map(|paths| paths.err) else {
            return TaskState::Pending;
        };
        match self.entries.get(err_log.as_path()) {
            None => TaskState::Pending,
            Some(entry) => match &entry.outcome {
                Ok(outcome) => TaskState::Scanned {
                    outcome: outcome.clone(),
                },
                Err(_) => TaskState::Unreadable,
            },
        }
    }

    /// Progress of `stage` at `point`.
    pub fn progress(&self, point: &GridPoint, stage: Stage) -> Result<StageProgress, FrsError> {
        let tasks = self.tasks(point, stage)?;
        let mut progress = StageProgress {
            point_id: point.id.clone(),
            stage,
            total: tasks.len(),
            completed: 0,
            failed: 0,
            pending: 0,
            undispatched: 0,
        };
        for task in &tasks {
            match self.task_state(task) {
                TaskState::Undispatched => progress.undispatched += 1,
                TaskState::Pending | TaskState::Unreadable => progress.pending += 1,
                TaskState::Scanned { outcome } if outcome.is_completed() => {
                    progress.completed += 1
                }
                TaskState::Scanned { .. } => progress.failed += 1,
            }
        }
        Ok(progress)
    }

    /// True when `stage` may be dispatched at `point`.
    pub fn ready(&self, point: &GridPoint, stage: Stage) -> Result<bool, FrsError> {
        match stage.previous() {
            None => Ok(true),
            Some(previous) => Ok(self.progress(point, previous)?.is_complete()),
        }
    }

    /// True when `task` is already covered by a submission.
    pub fn is_dispatched(&self, task: &Task) -> bool {
        self.task_state(task) != TaskState::Undispatched
    }
}

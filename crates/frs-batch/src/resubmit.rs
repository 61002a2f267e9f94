//! Resubmission of failed tasks.
//!
//! Arguments are recovered from the `- <name> <value>` header each executable
//! writes to its output stream on start-up. Arguments an executable does not
//! log cannot be recovered; such tasks are skipped with an
//! [`FrsError::ArgumentRecoveryFailure`] while the rest are resubmitted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{io_error, write_json, ErrorInfo, FrsError};
use frs_logs::naming::parse_header_line;
use frs_logs::{LogOutcome, LogPaths, LogStream, ScanEntry, ScanReport, TaskIds};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::descriptor::{SubmissionDescriptor, SubmissionRow};
use crate::scheduler::{CancelOutcome, ClusterId, Scheduler};

/// Rebuilds a flat `name value` argument vector from an output log.
///
/// `names` fixes the order. The first header line for a name wins.
pub fn recover_arguments(out_text: &str, names: &[String]) -> Result<Vec<String>, FrsError> {
    let mut logged: HashMap<&str, &str> = HashMap::new();
    for line in out_text.lines() {
        if let Some((name, value)) = parse_header_line(line) {
            logged.entry(name).or_insert(value);
        }
    }
    let mut arguments = Vec::with_capacity(names.len() * 2);
    for name in names {
        let value = logged.get(name.as_str()).ok_or_else(|| {
            FrsError::ArgumentRecoveryFailure(
                ErrorInfo::new("argument_not_logged", "argument missing from output header")
                    .with_context("argument", name.as_str()),
            )
        })?;
        arguments.push(name.clone());
        arguments.push((*value).to_string());
    }
    Ok(arguments)
}

/// A failed task with its recovered arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredTask {
    /// Row index in the original descriptor.
    pub row: usize,
    /// Error log that flagged the failure.
    pub log: PathBuf,
    /// Why the task is resubmitted.
    pub outcome: LogOutcome,
    /// Arguments read back from the output log.
    pub arguments: Vec<String>,
}

/// A failed task that cannot be resubmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySkip {
    /// Error log of the task.
    pub log: PathBuf,
    /// Why recovery failed.
    pub error: FrsError,
}

/// Resubmission work for one original descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResubmissionPlan {
    /// Location of the original descriptor.
    pub descriptor_path: PathBuf,
    /// The original descriptor.
    pub original: SubmissionDescriptor,
    /// Tasks to resubmit, in row order.
    pub tasks: Vec<RecoveredTask>,
    /// Failed tasks left out.
    pub skipped: Vec<RecoverySkip>,
}

impl ResubmissionPlan {
    /// True when nothing would be resubmitted.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Jobs that must leave the queue before their logs are reused.
    pub fn cancellations(&self) -> Vec<TaskIds> {
        self.tasks
            .iter()
            .filter_map(|task| self.original.rows.get(task.row)?.job)
            .collect()
    }

    /// The new descriptor: static configuration of the original, only the
    /// failed rows, each pinned to its original log files.
    pub fn descriptor(&self) -> SubmissionDescriptor {
        let rows = self
            .tasks
            .iter()
            .filter_map(|task| {
                let original = self.original.rows.get(task.row)?;
                Some(SubmissionRow {
                    arguments: task.arguments.clone(),
                    job: None,
                    ..original.clone()
                })
            })
            .collect();
        self.original.with_rows(rows)
    }
}

/// Matches the failed entries of `report` to rows of `original` and
/// recovers their arguments.
pub fn plan_resubmission(
    report: &ScanReport,
    descriptor_path: &Path,
    original: &SubmissionDescriptor,
) -> ResubmissionPlan {
    let mut plan = ResubmissionPlan {
        descriptor_path: descriptor_path.to_path_buf(),
        original: original.clone(),
        tasks: Vec::new(),
        skipped: Vec::new(),
    };
    for (index, row) in original.rows.iter().enumerate() {
        let Some(paths) = row.log_paths(original.convention) else {
            continue;
        };
        let Some(entry) = report.failures().find(|entry| entry.log == paths.err) else {
            continue;
        };
        let Ok(outcome) = &entry.outcome else {
            continue;
        };
        if let Some(error) = entry.task_error() {
            debug!(%error, "task needs resubmission");
        }
        match recover_row(entry, row) {
            Ok(arguments) => plan.tasks.push(RecoveredTask {
                row: index,
                log: entry.log.clone(),
                outcome: outcome.clone(),
                arguments,
            }),
            Err(error) => {
                warn!(log = %entry.log.display(), %error, "skipping task");
                plan.skipped.push(RecoverySkip {
                    log: entry.log.clone(),
                    error,
                });
            }
        }
    }
    plan
}

fn recover_row(entry: &ScanEntry, row: &SubmissionRow) -> Result<Vec<String>, FrsError> {
    let out_log = entry.sibling(LogStream::Out).ok_or_else(|| {
        FrsError::ArgumentRecoveryFailure(ErrorInfo::new(
            "output_log_name",
            "log convention has no output stream",
        ))
    })?;
    let bytes = fs::read(&out_log).map_err(|err| {
        FrsError::ArgumentRecoveryFailure(
            ErrorInfo::new("output_log_unreadable", err.to_string())
                .with_context("path", out_log.display().to_string()),
        )
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let arguments = recover_arguments(&text, &row.argument_names()).map_err(|err| match err {
        FrsError::ArgumentRecoveryFailure(info) => FrsError::ArgumentRecoveryFailure(
            info.with_context("path", out_log.display().to_string()),
        ),
        other => other,
    })?;
    if arguments != row.arguments {
        warn!(
            log = %out_log.display(),
            "logged arguments differ from the submitted ones; using the logged values"
        );
    }
    Ok(arguments)
}

/// Plans every descriptor in `descriptors`, keeping plans that have work or
/// skips to report.
pub fn plan_all(
    report: &ScanReport,
    descriptors: &[(PathBuf, SubmissionDescriptor)],
) -> Vec<ResubmissionPlan> {
    descriptors
        .iter()
        .filter(|(_, descriptor)| descriptor.resubmission_of.is_none())
        .map(|(path, descriptor)| plan_resubmission(report, path, descriptor))
        .filter(|plan| !plan.tasks.is_empty() || !plan.skipped.is_empty())
        .collect()
}

/// What executing a plan did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResubmissionReceipt {
    /// Cluster of the original descriptor.
    pub original_cluster: Option<ClusterId>,
    /// New submissions; one per task on legacy schedulers.
    pub clusters: Vec<ClusterId>,
    /// Tasks resubmitted.
    pub resubmitted: usize,
    /// Original jobs removed from the queue.
    pub cancelled: usize,
}

/// Cancels the original jobs, submits the plan and records the new job ids
/// in the original descriptor.
///
/// All cancellations happen before the first submission so that no two
/// copies of a task write to the same log at once.
pub fn execute(
    plan: &ResubmissionPlan,
    scheduler: &mut dyn Scheduler,
    submit_dir: &Path,
) -> Result<Option<ResubmissionReceipt>, FrsError> {
    if plan.is_empty() {
        return Ok(None);
    }
    let mut cancelled = 0;
    for job in plan.cancellations() {
        match scheduler.cancel(job)? {
            CancelOutcome::Removed => {
                cancelled += 1;
                info!(%job, "cancelled original job");
            }
            CancelOutcome::NotFound => {}
        }
    }

    let mut rotated = 0;
    for task in &plan.tasks {
        let Some(row) = plan.original.rows.get(task.row) else {
            continue;
        };
        if let Some(paths) = row.log_paths(plan.original.convention) {
            rotated += rotate_logs(&paths, row.attempts)?;
        }
    }

    let resubmission = plan.descriptor();
    let batches: Vec<SubmissionDescriptor> = if scheduler.supports_clusters() {
        vec![resubmission]
    } else {
        resubmission
            .rows
            .iter()
            .map(|row| resubmission.with_rows(vec![row.clone()]))
            .map(|mut single| {
                single.resubmission_of = resubmission.resubmission_of;
                single
            })
            .collect()
    };

    let mut original = plan.original.clone();
    let mut clusters = Vec::with_capacity(batches.len());
    let mut next_task = 0;
    for mut batch in batches {
        let cluster = scheduler.submit(&batch, submit_dir)?;
        batch.cluster = Some(cluster);
        for (process, row) in batch.rows.iter_mut().enumerate() {
            let job = TaskIds::new(cluster, process as u32);
            row.job = Some(job);
            row.attempts += 1;
            if let Some(task) = plan.tasks.get(next_task) {
                if let Some(target) = original.rows.get_mut(task.row) {
                    target.job = Some(job);
                    target.attempts += 1;
                }
            }
            next_task += 1;
        }
        batch.save(submit_dir)?;
        clusters.push(cluster);
    }
    write_json(&plan.descriptor_path, &original)?;
    info!(
        descriptor = %plan.descriptor_path.display(),
        resubmitted = plan.tasks.len(),
        cancelled,
        rotated,
        "resubmission complete"
    );
    Ok(Some(ResubmissionReceipt {
        original_cluster: plan.original.cluster,
        clusters,
        resubmitted: plan.tasks.len(),
        cancelled,
    }))
}

/// Name a log of `attempt` is moved to before the retry reuses its path.
pub fn rotated_path(path: &Path, attempt: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".attempt{attempt}"));
    PathBuf::from(name)
}

/// Moves the previous attempt's files aside so the retry starts from empty
/// logs even when the scheduler appends. Returns the number of files moved.
fn rotate_logs(paths: &LogPaths, attempt: u32) -> Result<usize, FrsError> {
    let mut moved = 0;
    for path in [Some(&paths.out), Some(&paths.err), paths.log.as_ref()]
        .into_iter()
        .flatten()
    {
        if !path.exists() {
            continue;
        }
        let target = rotated_path(path, attempt);
        fs::rename(path, &target).map_err(|err| io_error("log_rotate", path, err))?;
        moved += 1;
    }
    Ok(moved)
}

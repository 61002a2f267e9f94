use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{io_error, ErrorInfo, FrsError};
use frs_grid::Task;
use frs_logs::{LogPaths, TaskIds};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::descriptor::{SubmissionDescriptor, SubmitSettings};
use crate::scheduler::{ClusterId, Scheduler};

/// A task together with the ids the scheduler gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedTask {
    /// The submitted task.
    pub task: Task,
    /// Scheduler ids; they also name the task's logs.
    pub ids: TaskIds,
    /// Where the task's logs will appear.
    pub logs: LogPaths,
}

/// One accepted scheduler submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSubmission {
    /// Cluster (legacy: job) id.
    pub cluster: ClusterId,
    /// Executable shared by the tasks.
    pub executable: String,
    /// Tasks in process order.
    pub tasks: Vec<DispatchedTask>,
    /// Persisted descriptor.
    pub descriptor: PathBuf,
}

/// Everything a dispatch call submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Submissions in the order they were made.
    pub submissions: Vec<ClusterSubmission>,
}

impl DispatchReceipt {
    /// Total number of submitted tasks.
    pub fn task_count(&self) -> usize {
        self.submissions.iter().map(|s| s.tasks.len()).sum()
    }
}

/// Groups tasks sharing an executable and argument arity, preserving the
/// order in which each group first appears.
pub fn group_tasks(tasks: &[Task]) -> Vec<Vec<&Task>> {
    let mut groups: Vec<Vec<&Task>> = Vec::new();
    for task in tasks {
        let existing = groups.iter_mut().find(|group| {
            let head = group[0];
            head.executable == task.executable && head.arity() == task.arity()
        });
        match existing {
            Some(group) => group.push(task),
            None => groups.push(vec![task]),
        }
    }
    groups
}

/// Submits `tasks`, one scheduler submission per group on cluster
/// schedulers and one per task on legacy schedulers.
///
/// Each accepted submission is persisted below `submit_dir` before the next
/// one is attempted. A rejection stops the dispatch and is returned as is;
/// earlier submissions stay recorded.
pub fn dispatch(
    tasks: &[Task],
    scheduler: &mut dyn Scheduler,
    settings: &SubmitSettings,
    submit_dir: &Path,
) -> Result<DispatchReceipt, FrsError> {
    let mut receipt = DispatchReceipt::default();
    if tasks.is_empty() {
        info!("nothing to dispatch");
        return Ok(receipt);
    }
    for task in tasks {
        let dir = task.log_dir();
        fs::create_dir_all(&dir).map_err(|err| io_error("log_dir", &dir, err))?;
    }
    let convention = scheduler.convention();
    for group in group_tasks(tasks) {
        let batches: Vec<Vec<&Task>> = if scheduler.supports_clusters() {
            vec![group]
        } else {
            group.into_iter().map(|task| vec![task]).collect()
        };
        for batch in batches {
            let descriptor = SubmissionDescriptor::for_tasks(&batch, convention, settings);
            let (descriptor, path) = submit_fresh(scheduler, descriptor, submit_dir)?;
            let cluster = descriptor.cluster.unwrap_or_default();
            let dispatched = batch
                .iter()
                .zip(&descriptor.rows)
                .filter_map(|(task, row)| {
                    Some(DispatchedTask {
                        task: (*task).clone(),
                        ids: row.log_ids?,
                        logs: row.log_paths(convention)?,
                    })
                })
                .collect();
            receipt.submissions.push(ClusterSubmission {
                cluster,
                executable: descriptor.executable.clone(),
                tasks: dispatched,
                descriptor: path,
            });
        }
    }
    info!(
        submissions = receipt.submissions.len(),
        tasks = receipt.task_count(),
        scheduler = scheduler.name(),
        "dispatch complete"
    );
    Ok(receipt)
}

fn submit_fresh(
    scheduler: &mut dyn Scheduler,
    mut descriptor: SubmissionDescriptor,
    submit_dir: &Path,
) -> Result<(SubmissionDescriptor, PathBuf), FrsError> {
    let cluster = scheduler.submit(&descriptor, submit_dir)?;
    let accepted = scheduler.process_count(cluster)?;
    if accepted != descriptor.rows.len() {
        let cancelled = cancel_accepted(scheduler, cluster, accepted);
        return Err(FrsError::SchedulerUnavailable(
            ErrorInfo::new("partial_acceptance", "scheduler accepted fewer processes than submitted")
                .with_context("cluster", cluster.to_string())
                .with_context("accepted", accepted.to_string())
                .with_context("submitted", descriptor.rows.len().to_string())
                .with_context("cancelled", cancelled.to_string())
                .with_hint("dispatch the stage again once the scheduler recovers"),
        ));
    }
    for (process, row) in descriptor.rows.iter_mut().enumerate() {
        let ids = TaskIds::new(cluster, process as u32);
        row.log_ids = Some(ids);
        row.job = Some(ids);
        row.attempts = 1;
    }
    descriptor.cluster = Some(cluster);
    let path = descriptor.save(submit_dir)?;
    Ok((descriptor, path))
}

/// Removes the processes of a partially accepted cluster so no untracked job
/// keeps running. Returns how many cancel requests succeeded.
fn cancel_accepted(scheduler: &mut dyn Scheduler, cluster: ClusterId, accepted: usize) -> usize {
    let mut cancelled = 0;
    for process in 0..accepted {
        let job = TaskIds::new(cluster, process as u32);
        match scheduler.cancel(job) {
            Ok(_) => cancelled += 1,
            Err(err) => warn!(%job, error = %err, "could not remove partially accepted job"),
        }
    }
    cancelled
}

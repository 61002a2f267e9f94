use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{io_error, read_json, write_json, FrsError};
use frs_grid::{Stage, Task};
use frs_logs::naming::descriptor_file_name;
use frs_logs::{LogConvention, LogPaths, TaskIds};
use serde::{Deserialize, Serialize};

/// Directory below the grid root holding submit files and descriptors.
pub const SUBMISSIONS_DIR: &str = "submissions";

/// Resource requests copied verbatim into every submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Memory request in megabytes.
    #[serde(default)]
    pub memory_mb: Option<u32>,
    /// CPU cores per task.
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub max_runtime_s: Option<u64>,
    /// Scheduler specific extra settings, written as `key = value`.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Static settings shared by every submission of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSettings {
    /// Resource requests.
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Shell lines run before the executable (environment bootstrap).
    #[serde(default)]
    pub environment: Vec<String>,
}

/// One task inside a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRow {
    /// Owning grid point.
    pub point_id: String,
    /// Owning stage.
    pub stage: Stage,
    /// Log basename.
    pub basename: String,
    /// Working directory; logs live in `work_dir/logs`.
    pub work_dir: PathBuf,
    /// Flat `name value` argument pairs.
    pub arguments: Vec<String>,
    /// Ids the log files are named after. Fixed by the first dispatch and
    /// reused by every resubmission; earlier attempts are rotated aside.
    #[serde(default)]
    pub log_ids: Option<TaskIds>,
    /// Scheduler job currently responsible for the row.
    #[serde(default)]
    pub job: Option<TaskIds>,
    /// Number of submissions of this row.
    #[serde(default)]
    pub attempts: u32,
}

impl SubmissionRow {
    /// Row for a freshly synthesized task.
    pub fn from_task(task: &Task) -> Self {
        Self {
            point_id: task.point_id.clone(),
            stage: task.stage,
            basename: task.basename.clone(),
            work_dir: task.work_dir.clone(),
            arguments: task.arguments.clone(),
            log_ids: None,
            job: None,
            attempts: 0,
        }
    }

    /// Labels of the argument pairs.
    pub fn argument_names(&self) -> Vec<String> {
        self.arguments.iter().step_by(2).cloned().collect()
    }

    /// Log directory of the row.
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Concrete log paths, once ids are assigned.
    pub fn log_paths(&self, convention: LogConvention) -> Option<LogPaths> {
        let ids = self.log_ids?;
        Some(LogPaths::for_convention(
            convention,
            &self.log_dir(),
            &self.basename,
            ids,
        ))
    }

    /// True when the row was produced for `task`.
    pub fn matches_task(&self, executable: &str, task: &Task) -> bool {
        executable == task.executable
            && self.work_dir == task.work_dir
            && self.arguments == task.arguments
    }
}

/// Everything needed to (re)submit a batch of tasks sharing an executable
/// and argument arity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionDescriptor {
    /// Executable run by every row.
    pub executable: String,
    /// Basename of the first row, used to name the descriptor file.
    pub basename: String,
    /// Naming convention of the logs.
    pub convention: LogConvention,
    /// Static configuration copied into resubmissions.
    pub settings: SubmitSettings,
    /// Per-task rows.
    pub rows: Vec<SubmissionRow>,
    /// Cluster assigned on submission.
    #[serde(default)]
    pub cluster: Option<u64>,
    /// Cluster of the descriptor this one resubmits, if any.
    #[serde(default)]
    pub resubmission_of: Option<u64>,
}

impl SubmissionDescriptor {
    /// Builds an unsubmitted descriptor for a group of compatible tasks.
    pub fn for_tasks(tasks: &[&Task], convention: LogConvention, settings: &SubmitSettings) -> Self {
        let first = tasks.first();
        Self {
            executable: first.map(|t| t.executable.clone()).unwrap_or_default(),
            basename: first.map(|t| t.basename.clone()).unwrap_or_default(),
            convention,
            settings: settings.clone(),
            rows: tasks.iter().map(|task| SubmissionRow::from_task(task)).collect(),
            cluster: None,
            resubmission_of: None,
        }
    }

    /// Copy that keeps the static configuration and swaps in new rows.
    pub fn with_rows(&self, rows: Vec<SubmissionRow>) -> Self {
        Self {
            executable: self.executable.clone(),
            basename: self.basename.clone(),
            convention: self.convention,
            settings: self.settings.clone(),
            rows,
            cluster: None,
            resubmission_of: self.cluster,
        }
    }

    /// True when every row already owns log ids (a resubmission).
    pub fn pins_logs(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|row| row.log_ids.is_some())
    }

    /// Where the descriptor is persisted below `submit_dir`.
    pub fn path_in(&self, submit_dir: &Path) -> Option<PathBuf> {
        self.cluster
            .map(|cluster| submit_dir.join(descriptor_file_name(&self.basename, cluster)))
    }

    /// Persists the descriptor; it must have been submitted.
    pub fn save(&self, submit_dir: &Path) -> Result<PathBuf, FrsError> {
        let path = self.path_in(submit_dir).ok_or_else(|| {
            frs_core::config_error("descriptor_unsubmitted", "descriptor has no cluster id")
        })?;
        write_json(&path, self)?;
        Ok(path)
    }
}

/// Loads every persisted descriptor below `submit_dir`, sorted by path.
/// Resubmission records are skipped unless `include_resubmissions` is set.
pub fn load_descriptors(
    submit_dir: &Path,
    include_resubmissions: bool,
) -> Result<Vec<(PathBuf, SubmissionDescriptor)>, FrsError> {
    if !submit_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(submit_dir).map_err(|err| io_error("submit_dir", submit_dir, err))? {
        let entry = entry.map_err(|err| io_error("submit_dir_entry", submit_dir, err))?;
        let path = entry.path();
        let is_descriptor = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".submission.json"));
        if is_descriptor {
            paths.push(path);
        }
    }
    paths.sort();
    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let descriptor: SubmissionDescriptor = read_json(&path)?;
        if descriptor.resubmission_of.is_some() && !include_resubmissions {
            continue;
        }
        descriptors.push((path, descriptor));
    }
    Ok(descriptors)
}

use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{io_error, FrsError};
use frs_logs::naming::{LogPaths, TaskIds};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::point::GridPoint;
use crate::stage::{ShardSpec, Stage, StageTable, SHARD_LABELS};

/// One shell invocation belonging to exactly one grid point and stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Owning grid point.
    pub point_id: String,
    /// Owning stage.
    pub stage: Stage,
    /// Executable name.
    pub executable: String,
    /// Flat `name value` pairs; grid axes come first, in grid order.
    pub arguments: Vec<String>,
    /// Working directory of the owning grid point.
    pub work_dir: PathBuf,
    /// Basename of the task's log files.
    pub basename: String,
}

impl Task {
    /// Number of argument tokens.
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Directory receiving the task's log files.
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Labels of the argument pairs, in order.
    pub fn argument_names(&self) -> Vec<String> {
        self.arguments.iter().step_by(2).cloned().collect()
    }

    /// Concrete log paths once the scheduler has assigned ids.
    pub fn log_paths(&self, ids: TaskIds) -> LogPaths {
        LogPaths::cluster(&self.log_dir(), &self.basename, ids)
    }
}

/// Source of the shard count for sharded stages.
pub trait ShardSource {
    /// Number of input shards `stage` processes for `point`.
    fn shard_count(&self, point: &GridPoint, stage: Stage, spec: &ShardSpec)
        -> Result<usize, FrsError>;
}

/// Counts the entries of the stage's sample list: one shard per non-empty,
/// non-comment line.
#[derive(Debug, Clone)]
pub struct SampleListShards {
    base_dir: PathBuf,
}

impl SampleListShards {
    /// Resolves relative sample list paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl ShardSource for SampleListShards {
    fn shard_count(
        &self,
        _point: &GridPoint,
        _stage: Stage,
        spec: &ShardSpec,
    ) -> Result<usize, FrsError> {
        let path = self.resolve(&spec.sample_list);
        let text = fs::read_to_string(&path).map_err(|err| io_error("sample_list", &path, err))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count())
    }
}

/// Constant shard count, independent of point and stage.
#[derive(Debug, Clone, Copy)]
pub struct FixedShards(pub usize);

impl ShardSource for FixedShards {
    fn shard_count(&self, _: &GridPoint, _: Stage, _: &ShardSpec) -> Result<usize, FrsError> {
        Ok(self.0)
    }
}

/// Produces the tasks `stage` runs for `point`.
///
/// Pure in its inputs: the same point, stage table and shard count always
/// give the same list. A sharded stage with zero shards yields no tasks and
/// is treated as vacuously complete by callers.
pub fn synthesize(
    point: &GridPoint,
    stage: Stage,
    stages: &StageTable,
    grid_root: &Path,
    shards: &dyn ShardSource,
) -> Result<Vec<Task>, FrsError> {
    let spec = stages.get(stage);
    let basename = spec.basename(stage);
    let mut base_args = point.argument_pairs();
    for arg in &spec.args {
        base_args.push(arg.name.clone());
        base_args.push(arg.value.clone());
    }
    let make = |arguments: Vec<String>| Task {
        point_id: point.id.clone(),
        stage,
        executable: spec.executable.clone(),
        arguments,
        work_dir: point.work_dir(grid_root),
        basename: basename.clone(),
    };

    let Some(shard_spec) = &spec.shards else {
        return Ok(vec![make(base_args)]);
    };
    let count = shards.shard_count(point, stage, shard_spec)?;
    if count == 0 {
        info!(point = %point.id, %stage, "no input shards; stage is vacuously complete");
        return Ok(Vec::new());
    }
    Ok((0..count)
        .map(|index| {
            let mut arguments = base_args.clone();
            arguments.extend([
                SHARD_LABELS[0].to_string(),
                index.to_string(),
                SHARD_LABELS[1].to_string(),
                shard_output_name(&basename, index, &shard_spec.output_extension),
            ]);
            make(arguments)
        })
        .collect())
}

/// Index-qualified output file name of one shard.
pub fn shard_output_name(basename: &str, index: usize, extension: &str) -> String {
    format!("{basename}_{index}.{extension}")
}

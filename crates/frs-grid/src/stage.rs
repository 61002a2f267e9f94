use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use frs_core::{ErrorInfo, FrsError};
use serde::{Deserialize, Serialize};

use crate::axis::GridSpec;

/// Ordered phases of the per-point pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Fill the fake-rate measurement histograms.
    MeasurementFill,
    /// Derive the fake-rate maps from the filled measurement.
    MapDerivation,
    /// Apply the maps in the validation region and compare to observation.
    ClosureTest,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::MeasurementFill, Stage::MapDerivation, Stage::ClosureTest];

    /// Stage that must be complete before this one may run.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::MeasurementFill => None,
            Stage::MapDerivation => Some(Stage::MeasurementFill),
            Stage::ClosureTest => Some(Stage::MapDerivation),
        }
    }

    /// Stage that follows this one.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::MeasurementFill => Some(Stage::MapDerivation),
            Stage::MapDerivation => Some(Stage::ClosureTest),
            Stage::ClosureTest => None,
        }
    }

    /// Command line and configuration spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::MeasurementFill => "measurement-fill",
            Stage::MapDerivation => "map-derivation",
            Stage::ClosureTest => "closure-test",
        }
    }

    /// Default log basename for tasks of this stage.
    pub fn default_basename(self) -> &'static str {
        match self {
            Stage::MeasurementFill => "fill",
            Stage::MapDerivation => "maps",
            Stage::ClosureTest => "closure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = FrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                FrsError::Config(
                    ErrorInfo::new("stage_unknown", "unknown stage name")
                        .with_context("stage", s)
                        .with_hint("expected measurement-fill, map-derivation or closure-test"),
                )
            })
    }
}

/// A static `name value` argument passed to every task of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArgument {
    /// Label logged by the executable as `- <name> <value>`.
    pub name: String,
    /// Value, passed verbatim.
    pub value: String,
}

/// Argument labels appended to every task of a sharded stage.
pub const SHARD_LABELS: [&str; 2] = ["shard", "output"];

/// Sharding description for stages that run once per input sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    /// Sample list whose entries define the shards.
    pub sample_list: PathBuf,
    /// Extension of the per-shard output file.
    #[serde(default = "ShardSpec::default_extension")]
    pub output_extension: String,
}

impl ShardSpec {
    fn default_extension() -> String {
        "root".to_string()
    }
}

/// How one stage is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Executable handed to the scheduler.
    pub executable: String,
    /// Static arguments appended after the grid axis arguments.
    #[serde(default)]
    pub args: Vec<StageArgument>,
    /// Present when the stage runs one task per input sample.
    #[serde(default)]
    pub shards: Option<ShardSpec>,
    /// Log basename override.
    #[serde(default)]
    pub basename: Option<String>,
}

impl StageSpec {
    /// Basename used for this stage's log files.
    pub fn basename(&self, stage: Stage) -> String {
        self.basename
            .clone()
            .unwrap_or_else(|| stage.default_basename().to_string())
    }
}

/// Execution table for the three pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageTable {
    /// Measurement fill stage.
    pub measurement_fill: StageSpec,
    /// Map derivation stage.
    pub map_derivation: StageSpec,
    /// Closure test stage.
    pub closure_test: StageSpec,
}

impl StageTable {
    /// Spec for `stage`.
    pub fn get(&self, stage: Stage) -> &StageSpec {
        match stage {
            Stage::MeasurementFill => &self.measurement_fill,
            Stage::MapDerivation => &self.map_derivation,
            Stage::ClosureTest => &self.closure_test,
        }
    }

    /// Rejects static arguments that would break the flat argument list or
    /// shadow a grid axis in the log header.
    pub fn validate(&self, grid: &GridSpec) -> Result<(), FrsError> {
        let axes: BTreeSet<&str> = grid.axes.iter().map(|axis| axis.name.as_str()).collect();
        for stage in Stage::ALL {
            let mut seen = BTreeSet::new();
            for arg in &self.get(stage).args {
                let reject = |code: &str, message: &str| {
                    FrsError::Config(
                        ErrorInfo::new(code, message)
                            .with_context("stage", stage.as_str())
                            .with_context("name", arg.name.clone())
                            .with_context("value", arg.value.clone()),
                    )
                };
                if !is_token(&arg.name) || !is_token(&arg.value) {
                    return Err(reject(
                        "stage_argument_token",
                        "stage argument name and value must be non-empty and free of whitespace",
                    ));
                }
                if axes.contains(arg.name.as_str()) || SHARD_LABELS.contains(&arg.name.as_str()) {
                    return Err(reject(
                        "stage_argument_reserved",
                        "stage argument reuses a grid axis or shard label",
                    ));
                }
                if !seen.insert(arg.name.as_str()) {
                    return Err(reject("stage_argument_duplicate", "stage repeats an argument"));
                }
            }
        }
        Ok(())
    }
}

fn is_token(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace)
}

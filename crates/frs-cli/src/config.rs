use std::fs;
use std::path::{Path, PathBuf};

use frs_batch::{SchedulerSpec, SubmitSettings};
use frs_core::{from_yaml_slice, ErrorInfo, FrsError};
use frs_eval::EvalSpec;
use frs_grid::{GridSpec, StageTable};
use frs_logs::protocol::{DONE_MARKER, START_MARKER};
use frs_logs::{Protocol, ScanOptions};
use serde::{Deserialize, Serialize};

/// Marker tokens and extra fatal substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "ProtocolConfig::default_start")]
    pub start_marker: String,
    #[serde(default = "ProtocolConfig::default_done")]
    pub done_marker: String,
    /// Appended to the built-in fatal substrings.
    #[serde(default)]
    pub extra_fatal: Vec<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            start_marker: Self::default_start(),
            done_marker: Self::default_done(),
            extra_fatal: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    fn default_start() -> String {
        START_MARKER.to_string()
    }

    fn default_done() -> String {
        DONE_MARKER.to_string()
    }

    pub fn protocol(&self) -> Protocol {
        Protocol {
            start_marker: self.start_marker.clone(),
            done_marker: self.done_marker.clone(),
            ..Protocol::default()
        }
        .with_extra_fatal(self.extra_fatal.iter().cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "ScanConfig::enabled")]
    pub check_qsub_logs: bool,
    #[serde(default = "ScanConfig::enabled")]
    pub check_cluster_logs: bool,
    #[serde(default = "ScanConfig::enabled")]
    pub check_markers: bool,
    #[serde(default = "ScanConfig::enabled")]
    pub check_error_tags: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            check_qsub_logs: true,
            check_cluster_logs: true,
            check_markers: true,
            check_error_tags: true,
        }
    }
}

impl ScanConfig {
    fn enabled() -> bool {
        true
    }

    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            check_qsub_logs: self.check_qsub_logs,
            check_cluster_logs: self.check_cluster_logs,
            check_markers: self.check_markers,
            check_error_tags: self.check_error_tags,
        }
    }
}

/// Everything one campaign needs, loaded once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub grid: GridSpec,
    pub stages: StageTable,
    #[serde(default)]
    pub scheduler: SchedulerSpec,
    #[serde(default)]
    pub submit: SubmitSettings,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub evaluation: Option<EvalSpec>,
    /// Directory of the configuration file; relative sample lists resolve
    /// against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, FrsError> {
        let bytes = fs::read(path).map_err(|err| {
            FrsError::Config(
                ErrorInfo::new("config_read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let mut config: RunConfig = from_yaml_slice(&bytes).map_err(|err| {
            FrsError::Config(
                ErrorInfo::new("config_parse", err.info().message.clone())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        config.grid.validate()?;
        config.stages.validate(&config.grid)?;
        if let Some(evaluation) = &config.evaluation {
            evaluation.dimensions.validate()?;
        }
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    pub fn evaluation(&self) -> Result<&EvalSpec, FrsError> {
        self.evaluation.as_ref().ok_or_else(|| {
            FrsError::Config(
                ErrorInfo::new("config_evaluation", "configuration has no 'evaluation' section")
                    .with_hint("add years, flavors and processes under evaluation.dimensions"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
grid:
  axes:
    - name: threshold1
      values: [0.4, 0.5]
    - name: threshold2
      values: [0.02, 0.05]
stages:
  measurement-fill:
    executable: run_fill.sh
    shards:
      sample_list: samples_2018.txt
  map-derivation:
    executable: derive_maps.sh
  closure-test:
    executable: run_closure.sh
    args:
      - name: year
        value: "2018"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("frscan.yaml");
        fs::write(&path, MINIMAL).unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.grid.len(), 4);
        assert_eq!(config.scheduler, SchedulerSpec::default());
        assert!(config.scan.check_markers);
        assert_eq!(config.base_dir, temp.path());
        assert!(config.evaluation().is_err());
        let protocol = config.protocol.protocol();
        assert_eq!(protocol.start_marker, START_MARKER);
    }

    #[test]
    fn extra_fatal_patterns_extend_defaults() {
        let config = ProtocolConfig {
            extra_fatal: vec!["FATAL fit failed".to_string()],
            ..ProtocolConfig::default()
        };
        let protocol = config.protocol();
        assert_eq!(protocol.fatal.len(), Protocol::default().fatal.len() + 1);
    }

    #[test]
    fn stage_argument_with_whitespace_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("frscan.yaml");
        fs::write(&path, MINIMAL.replace("value: \"2018\"", "value: \"tight iso\"")).unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert_eq!(err.info().code, "stage_argument_token");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn evaluation_dimensions_are_checked_at_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("frscan.yaml");
        let config = format!(
            "{MINIMAL}evaluation:\n  dimensions:\n    years: [\"2018\"]\n    flavors: [\"e/mu\"]\n    processes: [ttbar]\n"
        );
        fs::write(&path, config).unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert_eq!(err.info().code, "eval_dimension_value");
    }

    #[test]
    fn unreadable_config_is_a_usage_error() {
        let err = RunConfig::load(Path::new("/nonexistent/frscan.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

//! Structured error types shared across frscan crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`FrsError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (point ids, cluster ids, paths).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the grid-search orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum FrsError {
    /// The external scheduler rejected or could not accept a submission.
    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(ErrorInfo),
    /// A task never wrote its completion marker.
    #[error("task unfinished: {0}")]
    TaskUnfinished(ErrorInfo),
    /// A known fatal substring was found in a task log.
    #[error("task errored: {0}")]
    TaskErrored(ErrorInfo),
    /// A required predicted/observed artifact could not be loaded.
    #[error("artifact missing: {0}")]
    ArtifactMissing(ErrorInfo),
    /// A labeled argument line was absent from a task's output log.
    #[error("argument recovery failed: {0}")]
    ArgumentRecoveryFailure(ErrorInfo),
    /// Invalid configuration or command line usage.
    #[error("configuration error: {0}")]
    Config(ErrorInfo),
    /// Local filesystem errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl FrsError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            FrsError::SchedulerUnavailable(info)
            | FrsError::TaskUnfinished(info)
            | FrsError::TaskErrored(info)
            | FrsError::ArtifactMissing(info)
            | FrsError::ArgumentRecoveryFailure(info)
            | FrsError::Config(info)
            | FrsError::Io(info)
            | FrsError::Serde(info) => info,
        }
    }

    /// Process exit code used by the CLI: 2 for usage/configuration problems,
    /// 1 for everything that went wrong while talking to the outside world.
    pub fn exit_code(&self) -> i32 {
        match self {
            FrsError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Wraps a filesystem failure together with the offending path.
pub fn io_error(code: &str, path: &std::path::Path, err: impl ToString) -> FrsError {
    FrsError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Builds a configuration error with the provided code and message.
pub fn config_error(code: &str, message: impl Into<String>) -> FrsError {
    FrsError::Config(ErrorInfo::new(code, message))
}

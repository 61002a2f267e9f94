use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{ErrorInfo, FrsError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::naming::{LogConvention, LogName, LogStream};
use crate::protocol::{Checks, LogOutcome, Protocol, UnfinishedReason};

/// Toggles for one scan. Every check class can be switched off on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Inspect legacy `<name>.e<job>` logs.
    pub check_qsub_logs: bool,
    /// Inspect cluster `<base>_err_<cluster>_<process>` logs.
    pub check_cluster_logs: bool,
    /// Compare sentinel marker counts.
    pub check_markers: bool,
    /// Search for fatal substrings.
    pub check_error_tags: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            check_qsub_logs: true,
            check_cluster_logs: true,
            check_markers: true,
            check_error_tags: true,
        }
    }
}

impl ScanOptions {
    fn checks(&self) -> Checks {
        Checks {
            markers: self.check_markers,
            error_tags: self.check_error_tags,
        }
    }

    fn selects(&self, name: &LogName) -> bool {
        if name.stream != LogStream::Err {
            return false;
        }
        match name.convention {
            LogConvention::Cluster => self.check_cluster_logs,
            LogConvention::Legacy => self.check_qsub_logs,
        }
    }
}

/// Why a candidate log could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    /// Diagnostic text.
    pub message: String,
}

/// Classification of one task's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Error-stream log that identifies the task.
    pub log: PathBuf,
    /// Decoded file name.
    pub name: LogName,
    /// Outcome, or the reason the file could not be read.
    pub outcome: Result<LogOutcome, ScanFailure>,
}

impl ScanEntry {
    /// True when the task must be resubmitted.
    pub fn needs_resubmission(&self) -> bool {
        matches!(
            self.outcome,
            Ok(LogOutcome::Unfinished { .. }) | Ok(LogOutcome::Errored { .. })
        )
    }

    /// The task's failure as an error, `None` when it completed or the log
    /// could not be read.
    pub fn task_error(&self) -> Option<FrsError> {
        let outcome = self.outcome.as_ref().ok()?;
        let info = |code: &str| {
            ErrorInfo::new(code, outcome.to_string())
                .with_context("log", self.log.display().to_string())
        };
        match outcome {
            LogOutcome::Completed => None,
            LogOutcome::Unfinished { .. } => Some(FrsError::TaskUnfinished(
                info("task_unfinished").with_hint("resubmit the task"),
            )),
            LogOutcome::Errored { .. } => Some(FrsError::TaskErrored(
                info("task_errored")
                    .with_hint("inspect the log before resubmitting; the cause may be systematic"),
            )),
        }
    }

    /// Path of the same task's `stream` log.
    pub fn sibling(&self, stream: LogStream) -> Option<PathBuf> {
        let file = self.name.with_stream(stream)?;
        Some(self.log.with_file_name(file))
    }
}

/// Aggregate counts over a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Logs inspected.
    pub scanned: usize,
    /// Completed tasks.
    pub clean: usize,
    /// Unfinished tasks.
    pub unfinished: usize,
    /// Errored tasks.
    pub errored: usize,
    /// Logs that could not be read.
    pub unreadable: usize,
    /// Directory entries the walk could not enter or stat.
    pub skipped: usize,
}

impl ScanSummary {
    /// Tasks that ended unfinished or errored.
    pub fn failed(&self) -> usize {
        self.unfinished + self.errored
    }
}

/// Result of scanning a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Root that was scanned.
    pub root: PathBuf,
    /// Number of logs inspected.
    pub scanned: usize,
    /// Per-log outcomes, sorted by path.
    pub entries: Vec<ScanEntry>,
    /// Directory entries that were not visited. Logs below them are missing
    /// from `entries`.
    #[serde(default)]
    pub skipped: Vec<ScanFailure>,
}

impl ScanReport {
    /// Counts each outcome variant.
    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            scanned: self.scanned,
            skipped: self.skipped.len(),
            ..ScanSummary::default()
        };
        for entry in &self.entries {
            match &entry.outcome {
                Ok(LogOutcome::Completed) => summary.clean += 1,
                Ok(LogOutcome::Unfinished { .. }) => summary.unfinished += 1,
                Ok(LogOutcome::Errored { .. }) => summary.errored += 1,
                Err(_) => summary.unreadable += 1,
            }
        }
        summary
    }

    /// Entries whose tasks must be resubmitted.
    pub fn failures(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|entry| entry.needs_resubmission())
    }

    /// Entries located below `dir`.
    pub fn under<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a ScanEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.log.starts_with(dir))
    }
}

/// Scans every log below `log_dir` and classifies each task.
///
/// Read-only: log files are never modified. Files that cannot be read are
/// recorded as [`ScanFailure`]s instead of aborting the scan.
pub fn scan(
    log_dir: &Path,
    options: &ScanOptions,
    protocol: &Protocol,
) -> Result<ScanReport, FrsError> {
    if !log_dir.is_dir() {
        return Err(FrsError::Config(
            ErrorInfo::new("scan_root", "log directory does not exist")
                .with_context("path", log_dir.display().to_string()),
        ));
    }
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for item in WalkDir::new(log_dir).sort_by_file_name() {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                skipped.push(ScanFailure {
                    message: err.to_string(),
                });
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }
        let Some(name) = item.file_name().to_str().and_then(LogName::parse) else {
            continue;
        };
        if !options.selects(&name) {
            continue;
        }
        let path = item.path().to_path_buf();
        let outcome = classify_file(&path, &name, options, protocol);
        match &outcome {
            Ok(LogOutcome::Unfinished {
                reason: UnfinishedReason::NeverStarted,
            }) => warn!(log = %path.display(), "no start marker; task may never have begun"),
            Ok(outcome) => debug!(log = %path.display(), %outcome, "classified"),
            Err(failure) => warn!(log = %path.display(), error = %failure.message, "unreadable log"),
        }
        entries.push(ScanEntry {
            log: path,
            name,
            outcome,
        });
    }
    Ok(ScanReport {
        root: log_dir.to_path_buf(),
        scanned: entries.len(),
        entries,
        skipped,
    })
}

fn classify_file(
    path: &Path,
    name: &LogName,
    options: &ScanOptions,
    protocol: &Protocol,
) -> Result<LogOutcome, ScanFailure> {
    let err_text = read_lossy(path).map_err(|err| ScanFailure {
        message: err.to_string(),
    })?;
    let mut companions = Vec::new();
    if options.check_error_tags {
        for stream in [LogStream::Out, LogStream::Log] {
            let Some(file) = name.with_stream(stream) else {
                continue;
            };
            // Companion logs are optional; a missing one is not a failure.
            if let Ok(text) = read_lossy(&path.with_file_name(file)) {
                companions.push(text);
            }
        }
    }
    let companion_refs: Vec<&str> = companions.iter().map(String::as_str).collect();
    Ok(protocol.classify(&err_text, &companion_refs, options.checks()))
}

fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

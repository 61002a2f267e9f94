//! File naming conventions shared by the dispatcher, the scanner and the
//! resubmission planner. Each convention is defined by exactly one function
//! here.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CLUSTER_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.+)_(?P<stream>out|err|log)_(?P<cluster>\d+)_(?P<process>\d+)$")
        .expect("cluster log pattern")
});

static LEGACY_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.+)\.(?P<stream>[oe])(?P<job>\d+)$").expect("legacy log pattern")
});

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^- (?P<name>\S+) (?P<value>\S+)\s*$").expect("header pattern")
});

/// The three streams a scheduled task writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Standard output; carries the argument header.
    Out,
    /// Standard error; carries the sentinel markers.
    Err,
    /// Scheduler event log (cluster schedulers only).
    Log,
}

impl LogStream {
    /// Infix used by the cluster convention.
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Out => "out",
            LogStream::Err => "err",
            LogStream::Log => "log",
        }
    }
}

/// Which scheduler family named a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogConvention {
    /// `{basename}_{out|err|log}_{cluster}_{process}`.
    Cluster,
    /// `{basename}.o{job}` / `{basename}.e{job}`.
    Legacy,
}

/// Scheduler-assigned identity of one task. Legacy jobs use process 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskIds {
    /// Cluster id (legacy: job id).
    pub cluster: u64,
    /// Process index within the cluster.
    pub process: u32,
}

impl TaskIds {
    /// Creates an id pair.
    pub fn new(cluster: u64, process: u32) -> Self {
        Self { cluster, process }
    }
}

impl fmt::Display for TaskIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.process)
    }
}

/// Cluster-convention file name: `{basename}_{stream}_{cluster}_{process}`.
pub fn cluster_log_name(basename: &str, stream: LogStream, ids: TaskIds) -> String {
    format!(
        "{basename}_{}_{}_{}",
        stream.as_str(),
        ids.cluster,
        ids.process
    )
}

/// Legacy-convention file name: `{basename}.o{job}` or `{basename}.e{job}`.
/// Legacy schedulers write no event log, so [`LogStream::Log`] has no name.
pub fn legacy_log_name(basename: &str, stream: LogStream, job: u64) -> Option<String> {
    let letter = match stream {
        LogStream::Out => 'o',
        LogStream::Err => 'e',
        LogStream::Log => return None,
    };
    Some(format!("{basename}.{letter}{job}"))
}

/// File name of a persisted submission descriptor.
pub fn descriptor_file_name(basename: &str, cluster: u64) -> String {
    format!("{basename}_{cluster}.submission.json")
}

/// Argument header line an executable writes to its output stream on start-up.
pub fn header_line(name: &str, value: &str) -> String {
    format!("- {name} {value}")
}

/// Parses one [`header_line`], returning `(name, value)`.
pub fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let caps = HEADER_RE.captures(line)?;
    let name = caps.name("name")?.as_str();
    let value = caps.name("value")?.as_str();
    Some((name, value))
}

/// Decoded log file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogName {
    /// Naming convention the file follows.
    pub convention: LogConvention,
    /// Task basename.
    pub basename: String,
    /// Stream the file holds.
    pub stream: LogStream,
    /// Scheduler ids.
    pub ids: TaskIds,
}

impl LogName {
    /// Decodes a bare file name under either convention.
    pub fn parse(file_name: &str) -> Option<Self> {
        if let Some(caps) = CLUSTER_NAME_RE.captures(file_name) {
            let stream = match &caps["stream"] {
                "out" => LogStream::Out,
                "err" => LogStream::Err,
                _ => LogStream::Log,
            };
            return Some(Self {
                convention: LogConvention::Cluster,
                basename: caps["base"].to_string(),
                stream,
                ids: TaskIds::new(caps["cluster"].parse().ok()?, caps["process"].parse().ok()?),
            });
        }
        let caps = LEGACY_NAME_RE.captures(file_name)?;
        let stream = if &caps["stream"] == "o" {
            LogStream::Out
        } else {
            LogStream::Err
        };
        Some(Self {
            convention: LogConvention::Legacy,
            basename: caps["base"].to_string(),
            stream,
            ids: TaskIds::new(caps["job"].parse().ok()?, 0),
        })
    }

    /// File name of the same task's `stream` file.
    pub fn with_stream(&self, stream: LogStream) -> Option<String> {
        match self.convention {
            LogConvention::Cluster => Some(cluster_log_name(&self.basename, stream, self.ids)),
            LogConvention::Legacy => legacy_log_name(&self.basename, stream, self.ids.cluster),
        }
    }
}

/// Concrete log locations of one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogPaths {
    /// Standard output file.
    pub out: PathBuf,
    /// Standard error file.
    pub err: PathBuf,
    /// Scheduler event log, cluster convention only.
    pub log: Option<PathBuf>,
}

impl LogPaths {
    /// Paths under the cluster convention.
    pub fn cluster(dir: &Path, basename: &str, ids: TaskIds) -> Self {
        Self {
            out: dir.join(cluster_log_name(basename, LogStream::Out, ids)),
            err: dir.join(cluster_log_name(basename, LogStream::Err, ids)),
            log: Some(dir.join(cluster_log_name(basename, LogStream::Log, ids))),
        }
    }

    /// Paths under the legacy convention; `ids.cluster` is the job id.
    pub fn legacy(dir: &Path, basename: &str, ids: TaskIds) -> Self {
        let name = |stream| legacy_log_name(basename, stream, ids.cluster).unwrap_or_default();
        Self {
            out: dir.join(name(LogStream::Out)),
            err: dir.join(name(LogStream::Err)),
            log: None,
        }
    }

    /// Paths under `convention`.
    pub fn for_convention(
        convention: LogConvention,
        dir: &Path,
        basename: &str,
        ids: TaskIds,
    ) -> Self {
        match convention {
            LogConvention::Cluster => Self::cluster(dir, basename, ids),
            LogConvention::Legacy => Self::legacy(dir, basename, ids),
        }
    }
}

#![deny(missing_docs)]
#![doc = "Sentinel log protocol, log naming conventions and the log scanner."]

pub mod naming;
pub mod protocol;
/// Directory scanning and outcome aggregation.
pub mod scan;

pub use naming::{LogConvention, LogName, LogPaths, LogStream, TaskIds};
pub use protocol::{Checks, FatalCategory, FatalPattern, LogOutcome, Protocol, UnfinishedReason};
pub use scan::{scan, ScanEntry, ScanFailure, ScanOptions, ScanReport, ScanSummary};

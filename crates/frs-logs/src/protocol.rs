//! Sentinel log protocol.
//!
//! Every dispatched executable writes [`Protocol::start_marker`] to its error
//! stream before doing any work and [`Protocol::done_marker`] once it has
//! finished successfully. Markers are counted anywhere in the text, not only
//! at line starts. A fatal substring anywhere in any of the task's logs marks
//! the task errored even when both markers are present, since output can be
//! corrupted mid-stream after the start marker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default start marker.
pub const START_MARKER: &str = "@@FRSCAN-START@@";
/// Default completion marker.
pub const DONE_MARKER: &str = "@@FRSCAN-DONE@@";
/// Tag an executable prints to flag its own failure.
pub const CUSTOM_ERROR_TAG: &str = "@@FRSCAN-ERROR@@";

/// Family of a fatal substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FatalCategory {
    /// Scheduler-internal failure (abort, periodic removal).
    Scheduler,
    /// Corrupted or unreadable compressed input.
    Decompression,
    /// Merge tool failure.
    Merge,
    /// Low level memory or bus error.
    Memory,
    /// Explicit error tag or operator supplied pattern.
    Custom,
}

impl FatalCategory {
    /// Lowercase label used in outcome reasons.
    pub fn as_str(self) -> &'static str {
        match self {
            FatalCategory::Scheduler => "scheduler",
            FatalCategory::Decompression => "decompression",
            FatalCategory::Merge => "merge",
            FatalCategory::Memory => "memory",
            FatalCategory::Custom => "custom",
        }
    }
}

/// A substring whose presence makes a task errored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalPattern {
    /// Literal text searched for.
    pub pattern: String,
    /// Family the pattern belongs to.
    pub category: FatalCategory,
}

impl FatalPattern {
    fn new(pattern: &str, category: FatalCategory) -> Self {
        Self {
            pattern: pattern.to_string(),
            category,
        }
    }
}

/// Built-in fatal substrings.
pub fn default_fatal_patterns() -> Vec<FatalPattern> {
    use FatalCategory::*;
    vec![
        FatalPattern::new("Job was aborted", Scheduler),
        FatalPattern::new("SYSTEM_PERIODIC_REMOVE", Scheduler),
        FatalPattern::new("R__unzip: error", Decompression),
        FatalPattern::new("Error in <TDecompression", Decompression),
        FatalPattern::new("hadd exiting due to error", Merge),
        FatalPattern::new("Bus error", Memory),
        FatalPattern::new("Segmentation violation", Memory),
        FatalPattern::new("std::bad_alloc", Memory),
        FatalPattern::new(CUSTOM_ERROR_TAG, Custom),
    ]
}

/// Marker tokens and fatal substrings in force for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Token written before the main work starts.
    #[serde(default = "Protocol::default_start")]
    pub start_marker: String,
    /// Token written after successful completion.
    #[serde(default = "Protocol::default_done")]
    pub done_marker: String,
    /// Fatal substrings, built-ins included.
    #[serde(default = "default_fatal_patterns")]
    pub fatal: Vec<FatalPattern>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            start_marker: Self::default_start(),
            done_marker: Self::default_done(),
            fatal: default_fatal_patterns(),
        }
    }
}

/// Which protocol checks to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    /// Compare start and completion marker counts.
    pub markers: bool,
    /// Search for fatal substrings.
    pub error_tags: bool,
}

impl Default for Checks {
    fn default() -> Self {
        Self {
            markers: true,
            error_tags: true,
        }
    }
}

/// Why a task counts as unfinished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UnfinishedReason {
    /// No start marker: the task may never have begun.
    NeverStarted,
    /// Started but the completion count does not match.
    MarkerMismatch {
        /// Start markers seen.
        starts: usize,
        /// Completion markers seen.
        completions: usize,
    },
}

/// Classification of one task from its logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum LogOutcome {
    /// Balanced, non-zero marker counts and no fatal text.
    Completed,
    /// Missing or unbalanced markers.
    Unfinished {
        /// Detail.
        reason: UnfinishedReason,
    },
    /// A fatal substring was found.
    Errored {
        /// Category and matched text.
        reason: String,
    },
}

impl LogOutcome {
    /// True for [`LogOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, LogOutcome::Completed)
    }
}

impl fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOutcome::Completed => write!(f, "completed"),
            LogOutcome::Unfinished {
                reason: UnfinishedReason::NeverStarted,
            } => write!(f, "unfinished (no start marker)"),
            LogOutcome::Unfinished {
                reason:
                    UnfinishedReason::MarkerMismatch {
                        starts,
                        completions,
                    },
            } => write!(f, "unfinished ({starts} starts, {completions} completions)"),
            LogOutcome::Errored { reason } => write!(f, "errored ({reason})"),
        }
    }
}

impl Protocol {
    fn default_start() -> String {
        START_MARKER.to_string()
    }

    fn default_done() -> String {
        DONE_MARKER.to_string()
    }

    /// Adds operator supplied fatal substrings.
    pub fn with_extra_fatal<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            self.fatal.push(FatalPattern {
                pattern: pattern.into(),
                category: FatalCategory::Custom,
            });
        }
        self
    }

    /// First fatal pattern present in any of `texts`.
    pub fn find_fatal<'a>(&'a self, texts: &[&str]) -> Option<&'a FatalPattern> {
        self.fatal.iter().find(|fatal| {
            !fatal.pattern.is_empty() && texts.iter().any(|text| text.contains(&fatal.pattern))
        })
    }

    /// Classifies a task from its error stream and any companion logs.
    ///
    /// Fatal text wins over marker counts. With marker checks disabled a task
    /// without fatal text counts as completed.
    pub fn classify(&self, err_text: &str, companions: &[&str], checks: Checks) -> LogOutcome {
        if checks.error_tags {
            let mut texts = Vec::with_capacity(companions.len() + 1);
            texts.push(err_text);
            texts.extend_from_slice(companions);
            if let Some(fatal) = self.find_fatal(&texts) {
                return LogOutcome::Errored {
                    reason: format!("{}: {}", fatal.category.as_str(), fatal.pattern),
                };
            }
        }
        if !checks.markers {
            return LogOutcome::Completed;
        }
        let starts = err_text.matches(self.start_marker.as_str()).count();
        let completions = err_text.matches(self.done_marker.as_str()).count();
        if starts == 0 {
            return LogOutcome::Unfinished {
                reason: UnfinishedReason::NeverStarted,
            };
        }
        if starts != completions {
            return LogOutcome::Unfinished {
                reason: UnfinishedReason::MarkerMismatch {
                    starts,
                    completions,
                },
            };
        }
        LogOutcome::Completed
    }
}

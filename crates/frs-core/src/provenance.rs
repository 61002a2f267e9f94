//! Provenance descriptors attached to manifests and reports.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Provenance information attached to every persisted manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunProvenance {
    /// Hash of the configuration that produced the artefact.
    pub input_hash: String,
    /// ISO-8601 timestamp recording when the artefact was generated.
    pub created_at: String,
    /// Version map for all tools involved in the run.
    pub tool_versions: BTreeMap<String, String>,
}

impl RunProvenance {
    /// Stamps the current time and the calling tool's version.
    pub fn now(input_hash: impl Into<String>, tool: &str, version: &str) -> Self {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert(tool.to_string(), version.to_string());
        Self {
            input_hash: input_hash.into(),
            created_at: Utc::now().to_rfc3339(),
            tool_versions,
        }
    }
}

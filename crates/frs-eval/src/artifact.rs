//! Binned result artifacts.
//!
//! Artifacts live in JSON files holding any number of named objects. The
//! upstream pipeline guarantees equal binning for every predicted/observed
//! pair, so the store only checks binning when merging.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{from_json_slice, write_json, ErrorInfo, FrsError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named binned distribution with per-bin uncertainties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedArtifact {
    /// Object name inside its file.
    pub name: String,
    /// Bin edges; one more than the number of bins.
    pub bin_edges: Vec<f64>,
    /// Bin contents.
    pub bin_values: Vec<f64>,
    /// Absolute uncertainty per bin.
    pub bin_errors: Vec<f64>,
}

impl BinnedArtifact {
    /// Builds an artifact, checking that the three vectors agree.
    pub fn new(
        name: impl Into<String>,
        bin_edges: Vec<f64>,
        bin_values: Vec<f64>,
        bin_errors: Vec<f64>,
    ) -> Result<Self, FrsError> {
        let artifact = Self {
            name: name.into(),
            bin_edges,
            bin_values,
            bin_errors,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Number of bins.
    pub fn bin_count(&self) -> usize {
        self.bin_values.len()
    }

    fn validate(&self) -> Result<(), FrsError> {
        let bins = self.bin_values.len();
        if self.bin_edges.len() != bins + 1 || self.bin_errors.len() != bins {
            return Err(FrsError::Serde(
                ErrorInfo::new("artifact_shape", "edges, values and errors disagree")
                    .with_context("name", self.name.as_str())
                    .with_context("edges", self.bin_edges.len().to_string())
                    .with_context("values", bins.to_string())
                    .with_context("errors", self.bin_errors.len().to_string()),
            ));
        }
        Ok(())
    }

    fn accumulate(&mut self, other: &BinnedArtifact) -> Result<(), FrsError> {
        if self.bin_edges != other.bin_edges {
            return Err(FrsError::Serde(
                ErrorInfo::new("artifact_binning", "cannot merge artifacts with different binning")
                    .with_context("name", self.name.as_str()),
            ));
        }
        for (value, add) in self.bin_values.iter_mut().zip(&other.bin_values) {
            *value += add;
        }
        for (error, add) in self.bin_errors.iter_mut().zip(&other.bin_errors) {
            *error = error.hypot(*add);
        }
        Ok(())
    }
}

/// Address of one object inside an artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactPath {
    /// File holding the object.
    pub file: PathBuf,
    /// Object name inside the file.
    pub object: String,
}

impl ArtifactPath {
    /// Creates an address.
    pub fn new(file: impl Into<PathBuf>, object: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            object: object.into(),
        }
    }
}

/// Storage of binned artifacts.
pub trait ArtifactStore {
    /// Loads one object.
    fn load(&self, path: &ArtifactPath) -> Result<BinnedArtifact, FrsError>;

    /// Writes `artifacts` to `file`, replacing its contents.
    fn save(&self, file: &Path, artifacts: &[BinnedArtifact]) -> Result<(), FrsError>;

    /// Merges `inputs` into `out`: same-named objects are summed bin by bin
    /// with errors added in quadrature; other objects are carried over.
    fn merge(&self, inputs: &[PathBuf], out: &Path) -> Result<PathBuf, FrsError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ArtifactFile {
    artifacts: Vec<BinnedArtifact>,
}

/// Artifact files stored as JSON, resolved against a base directory.
#[derive(Debug, Clone)]
pub struct JsonArtifactStore {
    base_dir: PathBuf,
}

impl JsonArtifactStore {
    /// Store resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        }
    }

    fn read_file(&self, file: &Path) -> Result<ArtifactFile, FrsError> {
        let path = self.resolve(file);
        let bytes = fs::read(&path).map_err(|err| {
            FrsError::ArtifactMissing(
                ErrorInfo::new("artifact_file", err.to_string())
                    .with_context("file", path.display().to_string()),
            )
        })?;
        from_json_slice(&bytes)
    }
}

impl ArtifactStore for JsonArtifactStore {
    fn load(&self, path: &ArtifactPath) -> Result<BinnedArtifact, FrsError> {
        let file = self.read_file(&path.file)?;
        let artifact = file
            .artifacts
            .into_iter()
            .find(|artifact| artifact.name == path.object)
            .ok_or_else(|| {
                FrsError::ArtifactMissing(
                    ErrorInfo::new("artifact_object", "object not present in file")
                        .with_context("file", self.resolve(&path.file).display().to_string())
                        .with_context("object", path.object.as_str()),
                )
            })?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn save(&self, file: &Path, artifacts: &[BinnedArtifact]) -> Result<(), FrsError> {
        for artifact in artifacts {
            artifact.validate()?;
        }
        let path = self.resolve(file);
        write_json(
            &path,
            &ArtifactFile {
                artifacts: artifacts.to_vec(),
            },
        )?;
        debug!(file = %path.display(), count = artifacts.len(), "artifacts saved");
        Ok(())
    }

    fn merge(&self, inputs: &[PathBuf], out: &Path) -> Result<PathBuf, FrsError> {
        let mut order: Vec<String> = Vec::new();
        let mut merged: BTreeMap<String, BinnedArtifact> = BTreeMap::new();
        for input in inputs {
            for artifact in self.read_file(input)?.artifacts {
                match merged.get_mut(&artifact.name) {
                    Some(existing) => existing.accumulate(&artifact)?,
                    None => {
                        order.push(artifact.name.clone());
                        merged.insert(artifact.name.clone(), artifact);
                    }
                }
            }
        }
        let artifacts: Vec<BinnedArtifact> = order
            .iter()
            .filter_map(|name| merged.remove(name))
            .collect();
        self.save(out, &artifacts)?;
        Ok(self.resolve(out))
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use frs_core::{io_error, read_json, write_json, ErrorInfo, FrsError, RunProvenance};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::axis::{GridSpec, ParameterAxis};
use crate::point::{AxisAssignment, GridPoint};

/// File name of the grid manifest written at the grid root.
pub const GRID_MANIFEST: &str = "grid.json";
/// File name of the per-point descriptor written inside each working directory.
pub const POINT_MANIFEST: &str = "point.json";

/// Enumerates the Cartesian product of the grid axes.
///
/// The first axis varies slowest, so repeated calls with the same axes give
/// the same ordered identifiers.
pub fn generate(grid: &GridSpec) -> Result<Vec<GridPoint>, FrsError> {
    grid.validate()?;
    let mut outputs = Vec::with_capacity(grid.len());
    expand_grid(&grid.axes, 0, Vec::new(), &mut outputs);
    Ok(outputs)
}

fn expand_grid(
    axes: &[ParameterAxis],
    idx: usize,
    current: Vec<AxisAssignment>,
    outputs: &mut Vec<GridPoint>,
) {
    if idx == axes.len() {
        outputs.push(GridPoint::new(current));
        return;
    }
    let axis = &axes[idx];
    for (position, value) in axis.values.iter().enumerate() {
        let mut next = current.clone();
        next.push(AxisAssignment {
            axis: axis.name.clone(),
            value: value.clone(),
            index: position,
        });
        expand_grid(axes, idx + 1, next, outputs);
    }
}

/// Outcome of provisioning working directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// Points whose directory was created by this call.
    pub created: Vec<String>,
    /// Points whose directory already existed and were left untouched.
    pub skipped: Vec<String>,
}

/// Manifest describing a provisioned grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridManifest {
    /// Grid definition the points were generated from.
    pub grid: GridSpec,
    /// Stable hash of `grid`.
    pub grid_hash: String,
    /// Point identifiers in generation order.
    pub points: Vec<String>,
    /// Provenance of the manifest.
    pub provenance: RunProvenance,
}

/// Creates one working directory per point below `grid_root`.
///
/// Existing directories count as already provisioned and are skipped unless
/// `force` is set, in which case they are removed and recreated empty.
pub fn provision(
    grid: &GridSpec,
    points: &[GridPoint],
    grid_root: &Path,
    force: bool,
) -> Result<ProvisionReport, FrsError> {
    fs::create_dir_all(grid_root).map_err(|err| io_error("grid_root", grid_root, err))?;
    let mut report = ProvisionReport::default();
    for point in points {
        let dir = point.work_dir(grid_root);
        if dir.exists() {
            if !force {
                debug!(point = %point.id, "already provisioned");
                report.skipped.push(point.id.clone());
                continue;
            }
            fs::remove_dir_all(&dir).map_err(|err| io_error("point_dir_remove", &dir, err))?;
        }
        fs::create_dir_all(&dir).map_err(|err| io_error("point_dir", &dir, err))?;
        write_json(&dir.join(POINT_MANIFEST), point)?;
        report.created.push(point.id.clone());
    }

    let grid_hash = grid.grid_hash()?;
    let manifest = GridManifest {
        grid: grid.clone(),
        grid_hash: grid_hash.clone(),
        points: points.iter().map(|p| p.id.clone()).collect(),
        provenance: RunProvenance::now(grid_hash, "frs-grid", env!("CARGO_PKG_VERSION")),
    };
    write_json(&grid_root.join(GRID_MANIFEST), &manifest)?;
    info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        root = %grid_root.display(),
        "grid provisioned"
    );
    Ok(report)
}

/// A provisioned grid loaded back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedGrid {
    /// Root directory holding the manifest and point directories.
    pub root: PathBuf,
    /// Grid definition recorded in the manifest.
    pub grid: GridSpec,
    /// Regenerated points, in manifest order.
    pub points: Vec<GridPoint>,
}

impl LoadedGrid {
    /// Looks up a point by identifier.
    pub fn point(&self, id: &str) -> Option<&GridPoint> {
        self.points.iter().find(|p| p.id == id)
    }
}

/// Loads `grid.json` from `grid_root` and regenerates its points.
///
/// When `expected` is given its hash must match the manifest; a mismatch
/// means the configuration changed since the grid was provisioned.
pub fn load_grid(grid_root: &Path, expected: Option<&GridSpec>) -> Result<LoadedGrid, FrsError> {
    let manifest: GridManifest = read_json(&grid_root.join(GRID_MANIFEST))?;
    if let Some(expected) = expected {
        let hash = expected.grid_hash()?;
        if hash != manifest.grid_hash {
            return Err(FrsError::Config(
                ErrorInfo::new("grid_hash_mismatch", "configured axes differ from grid manifest")
                    .with_context("manifest", manifest.grid_hash)
                    .with_context("configured", hash)
                    .with_hint("regenerate the grid or point --grid at the matching directory"),
            ));
        }
    }
    let points = generate(&manifest.grid)?;
    let regenerated: Vec<&str> = points.iter().map(|p| p.id.as_str()).collect();
    if regenerated != manifest.points.iter().map(String::as_str).collect::<Vec<_>>() {
        return Err(FrsError::Config(
            ErrorInfo::new("grid_manifest_points", "manifest point list is inconsistent")
                .with_context("root", grid_root.display().to_string()),
        ));
    }
    Ok(LoadedGrid {
        root: grid_root.to_path_buf(),
        grid: manifest.grid,
        points,
    })
}

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use frs_core::{config_error, ErrorInfo, FrsError};
use frs_grid::{GridPoint, GridSpec, ParameterAxis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{ArtifactPath, ArtifactStore};
use crate::divergence::Metric;

/// Value written in place of a score for failed entries. Un-normalized KL
/// scores may be negative, so the sentinel is not a real number.
pub const FAILED_SENTINEL: f64 = f64::NAN;

/// The (year, flavor, process) values an evaluation runs over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Data-taking years.
    pub years: Vec<String>,
    /// Lepton flavors.
    pub flavors: Vec<String>,
    /// Physics processes.
    pub processes: Vec<String>,
}

impl Dimensions {
    /// Every triple, year outermost.
    pub fn keys(&self) -> Vec<DimensionKey> {
        let mut keys = Vec::new();
        for year in &self.years {
            for flavor in &self.flavors {
                for process in &self.processes {
                    keys.push(DimensionKey {
                        year: year.clone(),
                        flavor: flavor.clone(),
                        process: process.clone(),
                    });
                }
            }
        }
        keys
    }

    /// Checks that every list is non-empty and free of duplicates, and that
    /// each entry is safe inside file names and SVG text.
    pub fn validate(&self) -> Result<(), FrsError> {
        for (name, values) in [
            ("years", &self.years),
            ("flavors", &self.flavors),
            ("processes", &self.processes),
        ] {
            if values.is_empty() {
                return Err(config_error(
                    "eval_dimensions",
                    format!("evaluation needs at least one entry in '{name}'"),
                ));
            }
            let mut seen = BTreeSet::new();
            for value in values {
                if value.is_empty() || !value.chars().all(is_dimension_char) {
                    return Err(FrsError::Config(
                        ErrorInfo::new("eval_dimension_value", "dimension value is not file-name safe")
                            .with_context("dimension", name)
                            .with_context("value", value.as_str())
                            .with_hint("use [A-Za-z0-9.+-]"),
                    ));
                }
                if !seen.insert(value.as_str()) {
                    return Err(FrsError::Config(
                        ErrorInfo::new("eval_dimension_duplicate", "dimension value listed twice")
                            .with_context("dimension", name)
                            .with_context("value", value.as_str()),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_dimension_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-')
}

/// One (year, flavor, process) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    /// Year.
    pub year: String,
    /// Flavor.
    pub flavor: String,
    /// Process.
    pub process: String,
}

impl DimensionKey {
    /// File-name friendly form, `year_flavor_process`.
    pub fn slug(&self) -> String {
        format!("{}_{}_{}", self.year, self.flavor, self.process)
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.flavor, self.process)
    }
}

/// Where a point's predicted and observed artifacts live.
///
/// Templates may use `{year}`, `{flavor}`, `{process}` and `{variation}`;
/// the file template is resolved against the point's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    /// File template.
    #[serde(default = "ArtifactLayout::default_file")]
    pub file: String,
    /// Object template.
    #[serde(default = "ArtifactLayout::default_object")]
    pub object: String,
    /// Variation name of the prediction.
    #[serde(default = "ArtifactLayout::default_predicted")]
    pub predicted: String,
    /// Variation name of the observation.
    #[serde(default = "ArtifactLayout::default_observed")]
    pub observed: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            file: Self::default_file(),
            object: Self::default_object(),
            predicted: Self::default_predicted(),
            observed: Self::default_observed(),
        }
    }
}

impl ArtifactLayout {
    fn default_file() -> String {
        "closure_{year}.json".to_string()
    }

    fn default_object() -> String {
        "{flavor}/{process}/{variation}".to_string()
    }

    fn default_predicted() -> String {
        "predicted".to_string()
    }

    fn default_observed() -> String {
        "observed".to_string()
    }

    /// Address of one variation of `key` for the point in `work_dir`.
    pub fn path(&self, work_dir: &Path, key: &DimensionKey, variation: &str) -> ArtifactPath {
        let fill = |template: &str| {
            template
                .replace("{year}", &key.year)
                .replace("{flavor}", &key.flavor)
                .replace("{process}", &key.process)
                .replace("{variation}", variation)
        };
        ArtifactPath::new(work_dir.join(fill(&self.file)), fill(&self.object))
    }

    /// Predicted and observed addresses.
    pub fn pair(&self, work_dir: &Path, key: &DimensionKey) -> (ArtifactPath, ArtifactPath) {
        (
            self.path(work_dir, key, &self.predicted),
            self.path(work_dir, key, &self.observed),
        )
    }
}

/// Evaluation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSpec {
    /// Divergence formula.
    #[serde(default)]
    pub metric: Metric,
    /// Triples to evaluate.
    pub dimensions: Dimensions,
    /// Artifact locations.
    #[serde(default)]
    pub layout: ArtifactLayout,
}

/// One cell of a score table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScoreEntry {
    /// Divergence of the point for the triple.
    Score {
        /// Divergence. Chi-square is never negative; un-normalized KL is
        /// negative where the observation falls below the prediction.
        value: f64,
    },
    /// The artifacts could not be loaded or compared.
    Failed {
        /// Diagnostic text.
        reason: String,
    },
}

impl ScoreEntry {
    /// Score, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            ScoreEntry::Score { value } => Some(*value),
            ScoreEntry::Failed { .. } => None,
        }
    }

    /// Score, or [`FAILED_SENTINEL`].
    pub fn rendered(&self) -> f64 {
        self.value().unwrap_or(FAILED_SENTINEL)
    }

    /// Size of the disagreement, independent of its sign.
    pub fn magnitude(&self) -> Option<f64> {
        self.value().map(f64::abs)
    }
}

/// Scores of every grid point for one triple, row-major over the axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    /// Triple the table belongs to.
    pub key: DimensionKey,
    /// Number of values per axis.
    pub shape: Vec<usize>,
    /// Cells; the last axis varies fastest.
    pub entries: Vec<ScoreEntry>,
}

impl ScoreTable {
    fn new(key: DimensionKey, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            key,
            shape,
            entries: vec![
                ScoreEntry::Failed {
                    reason: "not evaluated".to_string(),
                };
                len
            ],
        }
    }

    /// Flat position of the cell at `indices`.
    pub fn flat_index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (index, size) in indices.iter().zip(&self.shape) {
            if index >= size {
                return None;
            }
            flat = flat * size + index;
        }
        Some(flat)
    }

    /// Cell at `indices`.
    pub fn get(&self, indices: &[usize]) -> Option<&ScoreEntry> {
        self.entries.get(self.flat_index(indices)?)
    }

    /// Cells holding a score.
    pub fn finite_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().is_some()).count()
    }

    /// Cells holding the failed sentinel.
    pub fn failed_count(&self) -> usize {
        self.entries.len() - self.finite_count()
    }
}

/// Position of one point in the overall ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRank {
    /// 1-based rank.
    pub rank: usize,
    /// Point identifier.
    pub point_id: String,
    /// Sum of the magnitudes of the point's finite scores.
    pub total: f64,
    /// Number of failed triples.
    pub failed: usize,
}

/// Divergence scores of a grid over every triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoreboard {
    /// Formula the scores were computed with.
    pub metric: Metric,
    /// Grid axes, giving meaning to table indices.
    pub axes: Vec<ParameterAxis>,
    /// Evaluated points.
    pub points: Vec<GridPoint>,
    /// One table per triple.
    pub tables: Vec<ScoreTable>,
}

impl Scoreboard {
    /// Table of `key`.
    pub fn table(&self, key: &DimensionKey) -> Option<&ScoreTable> {
        self.tables.iter().find(|table| &table.key == key)
    }

    /// Failed cells over all tables.
    pub fn failed_count(&self) -> usize {
        self.tables.iter().map(ScoreTable::failed_count).sum()
    }

    /// Points ordered by summed divergence magnitude; points with failed
    /// triples come after every fully scored point.
    pub fn ranking(&self) -> Vec<PointRank> {
        let mut ranks: Vec<PointRank> = self
            .points
            .iter()
            .map(|point| {
                let indices = point.indices();
                let mut total = 0.0;
                let mut failed = 0;
                for table in &self.tables {
                    match table.get(&indices).and_then(ScoreEntry::magnitude) {
                        Some(value) => total += value,
                        None => failed += 1,
                    }
                }
                PointRank {
                    rank: 0,
                    point_id: point.id.clone(),
                    total,
                    failed,
                }
            })
            .collect();
        ranks.sort_by(|a, b| {
            (a.failed > 0)
                .cmp(&(b.failed > 0))
                .then(a.total.total_cmp(&b.total))
                .then_with(|| a.point_id.cmp(&b.point_id))
        });
        for (position, rank) in ranks.iter_mut().enumerate() {
            rank.rank = position + 1;
        }
        ranks
    }

    /// Best fully scored point.
    pub fn best(&self) -> Option<PointRank> {
        self.ranking().into_iter().find(|rank| rank.failed == 0)
    }
}

/// Scores every point for every triple of `spec`.
///
/// A missing or malformed artifact pair is recorded as a failed cell and
/// never stops the evaluation of other cells.
pub fn evaluate(
    points: &[GridPoint],
    grid: &GridSpec,
    grid_root: &Path,
    spec: &EvalSpec,
    store: &dyn ArtifactStore,
) -> Result<Scoreboard, FrsError> {
    spec.dimensions.validate()?;
    let keys = spec.dimensions.keys();
    let shape = grid.shape();
    let mut tables: Vec<ScoreTable> = keys
        .iter()
        .map(|key| ScoreTable::new(key.clone(), shape.clone()))
        .collect();

    for point in points {
        let indices = point.indices();
        let work_dir = point.work_dir(grid_root);
        let mut finite = 0;
        for table in tables.iter_mut() {
            let Some(flat) = table.flat_index(&indices) else {
                return Err(FrsError::Config(
                    ErrorInfo::new("point_outside_grid", "point does not belong to the grid")
                        .with_context("point", point.id.as_str()),
                ));
            };
            let entry = match score_pair(&work_dir, &table.key, spec, store) {
                Ok(value) => {
                    finite += 1;
                    ScoreEntry::Score { value }
                }
                Err(err) => {
                    warn!(point = %point.id, key = %table.key, error = %err, "recording failed entry");
                    ScoreEntry::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            table.entries[flat] = entry;
        }
        info!(point = %point.id, finite, failed = keys.len() - finite, "point evaluated");
    }

    let board = Scoreboard {
        metric: spec.metric,
        axes: grid.axes.clone(),
        points: points.to_vec(),
        tables,
    };
    info!(
        tables = board.tables.len(),
        failed = board.failed_count(),
        metric = %spec.metric,
        "scoreboard assembled"
    );
    Ok(board)
}

fn score_pair(
    work_dir: &Path,
    key: &DimensionKey,
    spec: &EvalSpec,
    store: &dyn ArtifactStore,
) -> Result<f64, FrsError> {
    let (predicted_path, observed_path) = spec.layout.pair(work_dir, key);
    let predicted = store.load(&predicted_path)?;
    let observed = store.load(&observed_path)?;
    spec.metric
        .compute(&predicted.bin_values, &observed.bin_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn flat_index_is_row_major() {
        let table = ScoreTable::new(
            DimensionKey {
                year: "2018".into(),
                flavor: "mu".into(),
                process: "ttbar".into(),
            },
            vec![2, 3],
        );
        assert_eq!(table.flat_index(&[0, 2]), Some(2));
        assert_eq!(table.flat_index(&[1, 0]), Some(3));
        assert_eq!(table.flat_index(&[2, 0]), None);
        assert_eq!(table.flat_index(&[1]), None);
        assert_eq!(table.failed_count(), 6);
    }

    #[test]
    fn layout_fills_templates() {
        let layout = ArtifactLayout::default();
        let key = DimensionKey {
            year: "2017".into(),
            flavor: "e".into(),
            process: "dy".into(),
        };
        let (predicted, observed) = layout.pair(Path::new("/grid/p"), &key);
        assert_eq!(predicted.file, PathBuf::from("/grid/p/closure_2017.json"));
        assert_eq!(predicted.object, "e/dy/predicted");
        assert_eq!(observed.object, "e/dy/observed");
    }

    fn dimensions(flavors: &[&str]) -> Dimensions {
        Dimensions {
            years: vec!["2018".into()],
            flavors: flavors.iter().map(|f| f.to_string()).collect(),
            processes: vec!["ttbar".into()],
        }
    }

    #[test]
    fn dimension_values_must_be_file_name_safe() {
        assert!(dimensions(&["e", "mu"]).validate().is_ok());
        let bad_lists: [&[&str]; 5] = [&["e<mu"], &["a/b"], &["e_mu"], &[""], &["mu", "mu"]];
        for bad in bad_lists {
            let err = dimensions(bad).validate().unwrap_err();
            assert_eq!(err.exit_code(), 2, "{bad:?}");
        }
    }

    #[test]
    fn kl_ranking_orders_by_magnitude() {
        use crate::artifact::{BinnedArtifact, JsonArtifactStore};
        use frs_grid::{generate, ParameterAxis};

        let temp = tempfile::tempdir().unwrap();
        let grid = GridSpec::new(vec![ParameterAxis::new("threshold1", ["0.4", "0.5"])]);
        let points = generate(&grid).unwrap();
        let spec = EvalSpec {
            metric: Metric::KullbackLeibler,
            dimensions: dimensions(&["mu"]),
            layout: ArtifactLayout::default(),
        };
        let store = JsonArtifactStore::new(temp.path());
        // Over-prediction at 0.4 gives a large negative KL.
        for (point, predicted, observed) in [
            (&points[0], vec![20.0, 10.0], vec![10.0, 10.0]),
            (&points[1], vec![10.0, 10.0], vec![11.0, 10.0]),
        ] {
            let edges = vec![0.0, 1.0, 2.0];
            let artifacts = [
                BinnedArtifact::new("mu/ttbar/predicted", edges.clone(), predicted, vec![1.0; 2])
                    .unwrap(),
                BinnedArtifact::new("mu/ttbar/observed", edges, observed, vec![1.0; 2]).unwrap(),
            ];
            store
                .save(&point.work_dir(temp.path()).join("closure_2018.json"), &artifacts)
                .unwrap();
        }

        let board = evaluate(&points, &grid, temp.path(), &spec, &store).unwrap();
        let table = &board.tables[0];
        let over = table.get(&[0]).and_then(ScoreEntry::value).unwrap();
        assert!((over - 10.0 * 0.5f64.ln()).abs() < 1e-9);
        assert!(over < 0.0);

        let ranking = board.ranking();
        assert_eq!(ranking[0].point_id, "threshold1=0.5");
        assert!((ranking[0].total - 11.0 * 1.1f64.ln()).abs() < 1e-9);
        assert!((ranking[1].total - 10.0 * 2.0f64.ln()).abs() < 1e-9);
        assert_eq!(board.best().unwrap().point_id, "threshold1=0.5");
    }

    #[test]
    fn failed_entries_render_as_sentinel() {
        let failed = ScoreEntry::Failed {
            reason: "missing".into(),
        };
        assert!(failed.rendered().is_nan());
        assert_eq!(ScoreEntry::Score { value: -1.0 }.rendered(), -1.0);
        assert_eq!(ScoreEntry::Score { value: -0.5 }.magnitude(), Some(0.5));
    }
}

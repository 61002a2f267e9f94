#![deny(missing_docs)]
#![doc = "Artifact loading, divergence scoring and scoreboard rendering."]

pub mod artifact;
pub mod divergence;
pub mod render;
/// Score tables, ranking and the evaluation loop.
pub mod scoreboard;

pub use artifact::{ArtifactPath, ArtifactStore, BinnedArtifact, JsonArtifactStore};
pub use divergence::{chi_square, kl_divergence, Metric};
pub use render::{
    render_csv, render_heatmap_svg, render_ranking_csv, write_scoreboard, HeatmapConfig,
    RANKING_CSV, SCOREBOARD_JSON,
};
pub use scoreboard::{
    evaluate, ArtifactLayout, DimensionKey, Dimensions, EvalSpec, PointRank, ScoreEntry,
    ScoreTable, Scoreboard, FAILED_SENTINEL,
};

//! Scoreboard output for operators: CSV matrices, a canonical JSON dump, a
//! ranking table and SVG heat maps for two-axis grids.

use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use frs_core::{io_error, to_canonical_json_bytes, ErrorInfo, FrsError};
use frs_grid::ParameterAxis;
use serde::{Deserialize, Serialize};

use crate::scoreboard::{PointRank, ScoreTable, Scoreboard, FAILED_SENTINEL};

/// File name of the JSON scoreboard.
pub const SCOREBOARD_JSON: &str = "scoreboard.json";
/// File name of the ranking table.
pub const RANKING_CSV: &str = "ranking.csv";

/// Heat map geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// Cell width in pixels.
    pub cell_width: u32,
    /// Cell height in pixels.
    pub cell_height: u32,
    /// Space for axis labels.
    pub margin: u32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            cell_width: 72,
            cell_height: 36,
            margin: 96,
        }
    }
}

fn wrap_csv(code: &str, err: csv::Error) -> FrsError {
    FrsError::Serde(ErrorInfo::new(code, "CSV scoreboard failure").with_hint(err.to_string()))
}

fn format_score(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    format!("{value:.6}")
}

/// Renders one table as CSV.
///
/// Two-axis grids become a matrix with the first axis down the rows and the
/// second across the columns. Other grids are flattened to one row per cell
/// with a column per axis.
pub fn render_csv(table: &ScoreTable, axes: &[ParameterAxis]) -> Result<String, FrsError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    if let [rows, columns] = axes {
        let mut header = vec![format!("{}\\{}", rows.name, columns.name)];
        header.extend(columns.values.iter().map(|v| v.to_string()));
        writer
            .write_record(&header)
            .map_err(|err| wrap_csv("scoreboard_csv_header", err))?;
        for (row, value) in rows.values.iter().enumerate() {
            let mut record = vec![value.to_string()];
            for column in 0..columns.values.len() {
                let cell = table
                    .get(&[row, column])
                    .map(|entry| entry.rendered())
                    .unwrap_or(FAILED_SENTINEL);
                record.push(format_score(cell));
            }
            writer
                .write_record(&record)
                .map_err(|err| wrap_csv("scoreboard_csv_row", err))?;
        }
    } else {
        let mut header: Vec<String> = axes.iter().map(|axis| axis.name.clone()).collect();
        header.push("score".to_string());
        writer
            .write_record(&header)
            .map_err(|err| wrap_csv("scoreboard_csv_header", err))?;
        for (flat, entry) in table.entries.iter().enumerate() {
            let mut record = Vec::with_capacity(axes.len() + 1);
            let mut rest = flat;
            let mut indices = vec![0; axes.len()];
            for (slot, axis) in indices.iter_mut().zip(axes).rev() {
                let size = axis.values.len().max(1);
                *slot = rest % size;
                rest /= size;
            }
            for (index, axis) in indices.iter().zip(axes) {
                record.push(
                    axis.values
                        .get(*index)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            record.push(format_score(entry.rendered()));
            writer
                .write_record(&record)
                .map_err(|err| wrap_csv("scoreboard_csv_row", err))?;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| wrap_csv("scoreboard_csv_flush", err.into_error().into()))?;
    String::from_utf8(bytes).map_err(|err| {
        FrsError::Serde(ErrorInfo::new("scoreboard_csv_utf8", err.to_string()))
    })
}

fn cell_color(value: Option<f64>, min: f64, max: f64) -> String {
    let Some(value) = value else {
        return "#9ca3af".to_string();
    };
    let span = (max - min).max(1e-9);
    let t = ((value - min) / span).clamp(0.0, 1.0);
    // Light for small divergence, dark blue for large.
    let channel = |low: f64, high: f64| (low + (high - low) * t).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(239.0, 30.0),
        channel(246.0, 64.0),
        channel(255.0, 175.0)
    )
}

/// Heat map of a two-axis table; `None` for other dimensionalities.
pub fn render_heatmap_svg(
    table: &ScoreTable,
    axes: &[ParameterAxis],
    config: &HeatmapConfig,
) -> Option<String> {
    let [rows, columns] = axes else {
        return None;
    };
    let finite: Vec<f64> = table.entries.iter().filter_map(|e| e.value()).collect();
    let min = finite.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = config.margin + config.cell_width * columns.values.len() as u32;
    let height = config.margin + config.cell_height * rows.values.len() as u32;
    let mut parts = vec![format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='{width}' height='{height}'>"
    )];
    parts.push(format!(
        "<text x='4' y='14' font-size='12'>{} ({} vs {})</text>",
        table.key, rows.name, columns.name
    ));
    for (column, value) in columns.values.iter().enumerate() {
        let x = config.margin + config.cell_width * column as u32 + 4;
        parts.push(format!(
            "<text x='{x}' y='{}' font-size='11'>{value}</text>",
            config.margin - 6
        ));
    }
    for (row, row_value) in rows.values.iter().enumerate() {
        let y = config.margin + config.cell_height * row as u32;
        parts.push(format!(
            "<text x='4' y='{}' font-size='11'>{row_value}</text>",
            y + config.cell_height / 2 + 4
        ));
        for column in 0..columns.values.len() {
            let x = config.margin + config.cell_width * column as u32;
            let value = table.get(&[row, column]).and_then(|e| e.value());
            let label = value.map(|v| format!("{v:.3}")).unwrap_or_else(|| "failed".into());
            parts.push(format!(
                "<rect x='{x}' y='{y}' width='{w}' height='{h}' fill='{fill}' stroke='#ffffff' />",
                w = config.cell_width,
                h = config.cell_height,
                fill = cell_color(value, min, max)
            ));
            parts.push(format!(
                "<text x='{}' y='{}' font-size='10'>{label}</text>",
                x + 6,
                y + config.cell_height / 2 + 4
            ));
        }
    }
    parts.push("</svg>".into());
    Some(parts.join(""))
}

/// Renders the ranking as CSV.
pub fn render_ranking_csv(ranking: &[PointRank]) -> Result<String, FrsError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["rank", "point", "total", "failed"])
        .map_err(|err| wrap_csv("ranking_csv_header", err))?;
    for rank in ranking {
        writer
            .write_record([
                rank.rank.to_string(),
                rank.point_id.clone(),
                format_score(rank.total),
                rank.failed.to_string(),
            ])
            .map_err(|err| wrap_csv("ranking_csv_row", err))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| wrap_csv("ranking_csv_flush", err.into_error().into()))?;
    String::from_utf8(bytes)
        .map_err(|err| FrsError::Serde(ErrorInfo::new("ranking_csv_utf8", err.to_string())))
}

fn write_text(path: &Path, text: &str) -> Result<(), FrsError> {
    fs::write(path, text).map_err(|err| io_error("scoreboard_write", path, err))
}

/// Writes every rendering of `board` below `out_dir` and returns the paths.
pub fn write_scoreboard(
    board: &Scoreboard,
    out_dir: &Path,
    heatmap: &HeatmapConfig,
) -> Result<Vec<PathBuf>, FrsError> {
    fs::create_dir_all(out_dir).map_err(|err| io_error("scoreboard_dir", out_dir, err))?;
    let mut written = Vec::new();

    let json_path = out_dir.join(SCOREBOARD_JSON);
    fs::write(&json_path, to_canonical_json_bytes(board)?)
        .map_err(|err| io_error("scoreboard_write", &json_path, err))?;
    written.push(json_path);

    for table in &board.tables {
        let csv_path = out_dir.join(format!("{}.csv", table.key.slug()));
        write_text(&csv_path, &render_csv(table, &board.axes)?)?;
        written.push(csv_path);
        if let Some(svg) = render_heatmap_svg(table, &board.axes, heatmap) {
            let svg_path = out_dir.join(format!("{}.svg", table.key.slug()));
            write_text(&svg_path, &svg)?;
            written.push(svg_path);
        }
    }

    let ranking_path = out_dir.join(RANKING_CSV);
    write_text(&ranking_path, &render_ranking_csv(&board.ranking())?)?;
    written.push(ranking_path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::{DimensionKey, ScoreEntry};

    fn table(entries: Vec<ScoreEntry>, shape: Vec<usize>) -> ScoreTable {
        ScoreTable {
            key: DimensionKey {
                year: "2018".into(),
                flavor: "mu".into(),
                process: "ttbar".into(),
            },
            shape,
            entries,
        }
    }

    fn axes() -> Vec<ParameterAxis> {
        vec![
            ParameterAxis::new("threshold1", ["0.4", "0.5"]),
            ParameterAxis::new("threshold2", ["0.02", "0.05"]),
        ]
    }

    fn entries() -> Vec<ScoreEntry> {
        vec![
            ScoreEntry::Score { value: -1.0 },
            ScoreEntry::Failed {
                reason: "missing".into(),
            },
            ScoreEntry::Score { value: 1.5 },
            ScoreEntry::Score { value: 0.0 },
        ]
    }

    #[test]
    fn matrix_csv_marks_failed_cells() {
        let csv = render_csv(&table(entries(), vec![2, 2]), &axes()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "threshold1\\threshold2,0.02,0.05");
        assert_eq!(lines[1], "0.4,-1.000000,NaN");
        assert_eq!(lines[2], "0.5,1.500000,0.000000");
    }

    #[test]
    fn other_dimensionalities_are_flattened() {
        let mut axes = axes();
        axes.push(ParameterAxis::new("bdt", ["0.1"]));
        let csv = render_csv(&table(entries(), vec![2, 2, 1]), &axes).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "threshold1,threshold2,bdt,score");
        assert_eq!(lines[3], "0.5,0.02,0.1,1.500000");
        assert!(render_heatmap_svg(&table(entries(), vec![2, 2, 1]), &axes, &HeatmapConfig::default()).is_none());
    }

    #[test]
    fn heatmap_has_one_cell_per_entry() {
        let svg =
            render_heatmap_svg(&table(entries(), vec![2, 2]), &axes(), &HeatmapConfig::default())
                .unwrap();
        assert_eq!(svg.matches("<rect").count(), 4);
        assert!(svg.contains("#9ca3af"));
        assert!(svg.contains(">failed<"));
    }
}

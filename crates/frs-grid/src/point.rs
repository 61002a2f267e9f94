use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::axis::AxisValue;

/// One axis of a grid point: the chosen value and its position on the axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisAssignment {
    /// Axis name.
    pub axis: String,
    /// Chosen value.
    pub value: AxisValue,
    /// Position of the value within the axis sequence.
    pub index: usize,
}

/// A concrete assignment of one value to every axis of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Deterministic, filesystem-safe identifier (see [`point_id`]).
    pub id: String,
    /// Assignments in grid axis order.
    pub assignments: Vec<AxisAssignment>,
}

impl GridPoint {
    /// Builds a point from its assignments, deriving the identifier.
    pub fn new(assignments: Vec<AxisAssignment>) -> Self {
        let id = point_id(&assignments);
        Self { id, assignments }
    }

    /// The point's working directory below `grid_root`.
    pub fn work_dir(&self, grid_root: &Path) -> PathBuf {
        grid_root.join(&self.id)
    }

    /// Axis positions, usable as an index into a scoreboard array.
    pub fn indices(&self) -> Vec<usize> {
        self.assignments.iter().map(|a| a.index).collect()
    }

    /// Value assigned to `axis`, if the axis belongs to the grid.
    pub fn value(&self, axis: &str) -> Option<&AxisValue> {
        self.assignments
            .iter()
            .find(|a| a.axis == axis)
            .map(|a| &a.value)
    }

    /// Flattened `name value` argument pairs in grid axis order.
    pub fn argument_pairs(&self) -> Vec<String> {
        self.assignments
            .iter()
            .flat_map(|a| [a.axis.clone(), a.value.to_string()])
            .collect()
    }
}

/// Identifier convention for grid points and their directories:
/// `axis=value` pairs in axis order joined with `_`.
pub fn point_id(assignments: &[AxisAssignment]) -> String {
    assignments
        .iter()
        .map(|a| format!("{}={}", a.axis, a.value))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(axis: &str, value: &str, index: usize) -> AxisAssignment {
        AxisAssignment {
            axis: axis.to_string(),
            value: AxisValue::new(value),
            index,
        }
    }

    #[test]
    fn id_concatenates_pairs_in_axis_order() {
        let point = GridPoint::new(vec![
            assignment("threshold1", "0.4", 0),
            assignment("threshold2", "0.05", 1),
        ]);
        assert_eq!(point.id, "threshold1=0.4_threshold2=0.05");
        assert_eq!(point.indices(), vec![0, 1]);
        assert_eq!(
            point.argument_pairs(),
            vec!["threshold1", "0.4", "threshold2", "0.05"]
        );
    }
}

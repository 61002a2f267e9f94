use std::collections::BTreeSet;
use std::fmt;

use frs_core::{config_error, stable_hash_string, ErrorInfo, FrsError};
use serde::{Deserialize, Serialize};

/// One discrete value on a parameter axis, carried as its canonical text.
///
/// Plans may spell values as YAML numbers or strings; both collapse to the
/// same text so that `0.4` and `"0.4"` address the same grid point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawAxisValue", into = "String")]
pub struct AxisValue(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAxisValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<RawAxisValue> for AxisValue {
    fn from(raw: RawAxisValue) -> Self {
        match raw {
            RawAxisValue::Int(value) => AxisValue(value.to_string()),
            RawAxisValue::Float(value) => AxisValue(value.to_string()),
            RawAxisValue::Text(value) => AxisValue(value),
        }
    }
}

impl From<AxisValue> for String {
    fn from(value: AxisValue) -> Self {
        value.0
    }
}

impl AxisValue {
    /// Wraps an already canonical value.
    pub fn new(value: impl Into<String>) -> Self {
        AxisValue(value.into())
    }

    /// Canonical text of the value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, ordered sequence of values swept by the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterAxis {
    /// Axis name, also used as the argument label handed to executables.
    pub name: String,
    /// Values in sweep order.
    pub values: Vec<AxisValue>,
}

impl ParameterAxis {
    /// Builds an axis from anything convertible to text.
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|v| AxisValue::new(v.into()))
                .collect(),
        }
    }

    /// Position of `value` on this axis.
    pub fn position(&self, value: &AxisValue) -> Option<usize> {
        self.values.iter().position(|candidate| candidate == value)
    }
}

/// The full set of axes for a run, passed explicitly to every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Axes in nesting order; the first axis varies slowest.
    pub axes: Vec<ParameterAxis>,
}

impl GridSpec {
    /// Creates a grid from its axes.
    pub fn new(axes: Vec<ParameterAxis>) -> Self {
        Self { axes }
    }

    /// Shape of the grid, one extent per axis.
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|axis| axis.values.len()).collect()
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.shape().iter().product()
    }

    /// Returns true when the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable hash of the grid definition.
    pub fn grid_hash(&self) -> Result<String, FrsError> {
        stable_hash_string(self)
    }

    /// Rejects grids that cannot be enumerated or would produce unsafe ids.
    pub fn validate(&self) -> Result<(), FrsError> {
        if self.axes.is_empty() {
            return Err(config_error("grid_no_axes", "grid defines no parameter axes"));
        }
        let mut seen = BTreeSet::new();
        for axis in &self.axes {
            if !seen.insert(axis.name.as_str()) {
                return Err(FrsError::Config(
                    ErrorInfo::new("grid_duplicate_axis", "axis defined twice")
                        .with_context("axis", axis.name.clone()),
                ));
            }
            if axis.name.is_empty() || !axis.name.chars().all(is_name_char) {
                return Err(FrsError::Config(
                    ErrorInfo::new("grid_axis_name", "axis name is not filesystem safe")
                        .with_context("axis", axis.name.clone())
                        .with_hint("use [A-Za-z0-9._+-]"),
                ));
            }
            if axis.values.is_empty() {
                return Err(FrsError::Config(
                    ErrorInfo::new("grid_empty_axis", "axis has no values")
                        .with_context("axis", axis.name.clone()),
                ));
            }
            let mut distinct = BTreeSet::new();
            for value in &axis.values {
                if value.0.is_empty() || !value.0.chars().all(is_value_char) {
                    return Err(FrsError::Config(
                        ErrorInfo::new(
                            "grid_axis_value",
                            "axis value is not filesystem safe",
                        )
                        .with_context("axis", axis.name.clone())
                        .with_context("value", value.0.clone())
                        .with_hint("use [A-Za-z0-9.+-]"),
                    ));
                }
                if !distinct.insert(value) {
                    return Err(FrsError::Config(
                        ErrorInfo::new("grid_duplicate_value", "axis repeats a value")
                            .with_context("axis", axis.name.clone())
                            .with_context("value", value.0.clone()),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-')
}

fn is_name_char(c: char) -> bool {
    is_value_char(c) || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_numbers_and_strings_share_canonical_text() {
        let axis: ParameterAxis =
            serde_yaml::from_str("name: threshold1\nvalues: [0.4, \"0.5\", 3]\n").unwrap();
        let text: Vec<&str> = axis.values.iter().map(AxisValue::as_str).collect();
        assert_eq!(text, vec!["0.4", "0.5", "3"]);
    }

    #[test]
    fn rejects_separator_in_values() {
        let grid = GridSpec::new(vec![ParameterAxis::new("wp", ["tight_v2"])]);
        let err = grid.validate().unwrap_err();
        assert_eq!(err.info().code, "grid_axis_value");
    }

    #[test]
    fn rejects_duplicate_axes() {
        let grid = GridSpec::new(vec![
            ParameterAxis::new("a", ["1"]),
            ParameterAxis::new("a", ["2"]),
        ]);
        assert_eq!(grid.validate().unwrap_err().info().code, "grid_duplicate_axis");
    }
}

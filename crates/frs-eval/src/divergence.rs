//! Divergence between a predicted and an observed binned distribution.
//!
//! Both formulas run on raw bin contents without normalizing to unit area,
//! so an overall yield mismatch contributes as well as a shape mismatch.
//! Bins where either side is not strictly positive are skipped.

use std::fmt;
use std::str::FromStr;

use frs_core::{config_error, ErrorInfo, FrsError};
use serde::{Deserialize, Serialize};

/// Selectable divergence formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// `Σ (o − p)² / p`.
    #[default]
    #[serde(rename = "chi2")]
    ChiSquare,
    /// `Σ o · ln(o / p)`.
    #[serde(rename = "kl")]
    KullbackLeibler,
}

impl Metric {
    /// Configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::ChiSquare => "chi2",
            Metric::KullbackLeibler => "kl",
        }
    }

    /// Applies the formula to equally binned contents.
    pub fn compute(self, predicted: &[f64], observed: &[f64]) -> Result<f64, FrsError> {
        if predicted.len() != observed.len() {
            return Err(FrsError::Serde(
                ErrorInfo::new("bin_count_mismatch", "predicted and observed bin counts differ")
                    .with_context("predicted", predicted.len().to_string())
                    .with_context("observed", observed.len().to_string()),
            ));
        }
        Ok(match self {
            Metric::ChiSquare => chi_square(predicted, observed),
            Metric::KullbackLeibler => kl_divergence(predicted, observed),
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = FrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chi2" => Ok(Metric::ChiSquare),
            "kl" => Ok(Metric::KullbackLeibler),
            other => Err(config_error(
                "metric_unknown",
                format!("unknown divergence metric '{other}' (expected chi2 or kl)"),
            )),
        }
    }
}

fn positive_pairs<'a>(
    predicted: &'a [f64],
    observed: &'a [f64],
) -> impl Iterator<Item = (f64, f64)> + 'a {
    predicted
        .iter()
        .zip(observed)
        .filter(|(p, o)| **p > 0.0 && **o > 0.0)
        .map(|(p, o)| (*p, *o))
}

/// Chi-square over bins where both contents are positive.
pub fn chi_square(predicted: &[f64], observed: &[f64]) -> f64 {
    positive_pairs(predicted, observed)
        .map(|(p, o)| (o - p).powi(2) / p)
        .sum()
}

/// Kullback-Leibler divergence of observed from predicted over bins where
/// both contents are positive.
pub fn kl_divergence(predicted: &[f64], observed: &[f64]) -> f64 {
    positive_pairs(predicted, observed)
        .map(|(p, o)| o * (o / p).ln())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chi_square_skips_empty_prediction() {
        let value = chi_square(&[0.0, 2.0, 4.0], &[1.0, 2.0, 3.0]);
        assert!((value - 0.25).abs() < 1e-12);
    }

    #[test]
    fn identical_distributions_have_zero_divergence() {
        let bins = [1.0, 5.0, 9.0];
        assert_eq!(chi_square(&bins, &bins), 0.0);
        assert_eq!(kl_divergence(&bins, &bins), 0.0);
    }

    #[test]
    fn kl_uses_raw_counts() {
        let value = kl_divergence(&[1.0, 0.0], &[2.0, 3.0]);
        assert!((value - 2.0 * 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn metric_names_parse() {
        assert_eq!("kl".parse::<Metric>().unwrap(), Metric::KullbackLeibler);
        assert_eq!(Metric::default().to_string(), "chi2");
        assert_eq!("l2".parse::<Metric>().unwrap_err().exit_code(), 2);
    }

    #[test]
    fn mismatched_binning_is_rejected() {
        assert!(Metric::ChiSquare.compute(&[1.0], &[1.0, 2.0]).is_err());
    }
}

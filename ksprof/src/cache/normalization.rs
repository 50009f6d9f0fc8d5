//! Normalization strategies for cached feature rows
//!
//! `RobustLinear` rescales each feature by per-plate robust range
//! parameters (1st and 99th percentiles of the plate's control
//! population), so features from different plates are comparable. The
//! parameters are computed when the cache is built and stored next to
//! the feature rows; loading only applies them.

use ksprof_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Strategy tag passed to every cache load. Both loads of one group
/// computation must use the same strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Rows as stored.
    Raw,
    /// Per-plate robust linear rescale to the plate's control range.
    RobustLinear,
}

impl Normalization {
    pub fn as_str(self) -> &'static str {
        match self {
            Normalization::Raw => "raw",
            Normalization::RobustLinear => "robust_linear",
        }
    }
}

/// Per-plate rescale parameters: one lower/upper bound per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustLinearParams {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl RobustLinearParams {
    /// Compute parameters from a plate's reference rows (1st and 99th
    /// percentile per feature).
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let width = match rows.first() {
            Some(row) => row.len(),
            None => {
                return Err(Error::Config(
                    "cannot compute normalization parameters from zero rows".into(),
                ))
            }
        };
        let mut lower = Vec::with_capacity(width);
        let mut upper = Vec::with_capacity(width);
        for feature in 0..width {
            let mut values: Vec<f64> = rows
                .iter()
                .map(|row| row[feature])
                .filter(|v| !v.is_nan())
                .collect();
            if values.is_empty() {
                lower.push(0.0);
                upper.push(1.0);
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));
            lower.push(percentile(&values, 0.01));
            upper.push(percentile(&values, 0.99));
        }
        Ok(Self { lower, upper })
    }

    /// Rescale one row in place: `(x - lower) / (upper - lower)`.
    ///
    /// A feature with no spread on this plate is left centered instead of
    /// dividing by zero.
    pub fn apply(&self, row: &mut [f64]) -> Result<()> {
        if row.len() != self.lower.len() {
            return Err(Error::SchemaMismatch {
                detail: format!(
                    "row has {} features but normalization parameters have {}",
                    row.len(),
                    self.lower.len()
                ),
            });
        }
        for (i, value) in row.iter_mut().enumerate() {
            let spread = self.upper[i] - self.lower[i];
            let spread = if spread.abs() > f64::EPSILON { spread } else { 1.0 };
            *value = (*value - self.lower[i]) / spread;
        }
        Ok(())
    }
}

/// Percentile of a sorted, NaN-free slice with linear interpolation.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q * (sorted.len() - 1) as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let weight = rank - below as f64;
    sorted[below] * (1.0 - weight) + sorted[above] * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), 0.0);
        assert_eq!(percentile(&values, 1.0), 4.0);
        assert_eq!(percentile(&values, 0.5), 2.0);
        assert!((percentile(&values, 0.99) - 3.96).abs() < 1e-12);
    }

    #[test]
    fn apply_rescales_to_the_plate_range() {
        let params = RobustLinearParams {
            lower: vec![0.0, 10.0],
            upper: vec![2.0, 20.0],
        };
        let mut row = vec![1.0, 15.0];
        params.apply(&mut row).unwrap();
        assert_eq!(row, vec![0.5, 0.5]);
    }

    #[test]
    fn zero_spread_does_not_divide_by_zero() {
        let params = RobustLinearParams {
            lower: vec![3.0],
            upper: vec![3.0],
        };
        let mut row = vec![5.0];
        params.apply(&mut row).unwrap();
        assert_eq!(row, vec![2.0]);
    }

    #[test]
    fn width_mismatch_is_a_schema_error() {
        let params = RobustLinearParams {
            lower: vec![0.0],
            upper: vec![1.0],
        };
        let mut row = vec![1.0, 2.0];
        assert!(matches!(
            params.apply(&mut row),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn from_rows_takes_robust_bounds_per_feature() {
        let rows: Vec<Vec<f64>> = (0..101).map(|i| vec![i as f64, f64::NAN]).collect();
        let params = RobustLinearParams::from_rows(&rows).unwrap();
        assert!((params.lower[0] - 1.0).abs() < 1e-12);
        assert!((params.upper[0] - 99.0).abs() < 1e-12);
        // NaN-only feature falls back to the unit range.
        assert_eq!(params.lower[1], 0.0);
        assert_eq!(params.upper[1], 1.0);
    }
}

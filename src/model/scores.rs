use serde::Serialize;

use crate::error::VerifError;
use crate::model::grid::{nan_mean, nan_std};

/// One threshold/window entry of a score matrix.
///
/// `score` is NaN exactly when `denominator` is zero; consumers must
/// special-case it rather than expect an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreCell {
    pub numerator: f64,
    pub denominator: f64,
    /// 1 - numerator/denominator, in (-inf, 1]; 1 only when numerator == 0.
    pub score: f64,
    /// (forecast exceedance count - observed exceedance count) / total cells.
    pub bias_indicator: f64,
}

/// Threshold (rows) x window (columns) score matrix for one forecast.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreMatrix {
    thresholds: Vec<f64>,
    windows: Vec<usize>,
    cells: Vec<ScoreCell>,
}

impl ScoreMatrix {
    pub fn new(
        thresholds: Vec<f64>,
        windows: Vec<usize>,
        cells: Vec<ScoreCell>,
    ) -> Result<Self, VerifError> {
        if cells.len() != thresholds.len() * windows.len() {
            return Err(VerifError::ShapeMismatch(format!(
                "{} cells for a {}x{} score matrix",
                cells.len(),
                thresholds.len(),
                windows.len()
            )));
        }
        Ok(Self {
            thresholds,
            windows,
            cells,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    pub fn n_thresholds(&self) -> usize {
        self.thresholds.len()
    }

    pub fn n_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> &ScoreCell {
        &self.cells[row * self.windows.len() + col]
    }

    pub fn cells(&self) -> &[ScoreCell] {
        &self.cells
    }

    pub fn scores(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.score).collect()
    }

    /// Append the rows of `other` below `self` (extended matrix: absolute
    /// thresholds first, percentile thresholds after).
    pub fn concat_rows(mut self, other: ScoreMatrix) -> Result<Self, VerifError> {
        if self.windows != other.windows {
            return Err(VerifError::ShapeMismatch(
                "cannot concatenate score matrices over different window sets".to_string(),
            ));
        }
        self.thresholds.extend(other.thresholds);
        self.cells.extend(other.cells);
        Ok(self)
    }

    pub fn same_shape(&self, other: &ScoreMatrix) -> bool {
        self.thresholds.len() == other.thresholds.len() && self.windows == other.windows
    }
}

/// Per-cell ranks of one forecast within a comparison.
/// 0 = missing, 1 = below no-skill, 2 = perfect, >= 3 = competition rank.
#[derive(Debug, Clone, Serialize)]
pub struct RankMatrix {
    n_thresholds: usize,
    n_windows: usize,
    ranks: Vec<u32>,
}

impl RankMatrix {
    pub(crate) fn new(n_thresholds: usize, n_windows: usize, ranks: Vec<u32>) -> Self {
        debug_assert_eq!(ranks.len(), n_thresholds * n_windows);
        Self {
            n_thresholds,
            n_windows,
            ranks,
        }
    }

    pub fn n_thresholds(&self) -> usize {
        self.n_thresholds
    }

    pub fn n_windows(&self) -> usize {
        self.n_windows
    }

    pub fn rank(&self, row: usize, col: usize) -> u32 {
        self.ranks[row * self.n_windows + col]
    }

    pub fn ranks(&self) -> &[u32] {
        &self.ranks
    }

    pub fn max_rank(&self) -> u32 {
        self.ranks.iter().copied().max().unwrap_or(0)
    }
}

/// Scalar condensed score plus the per-cell contributions it sums
/// (kept for visualization alongside the matrix the score derives from).
#[derive(Debug, Clone, Serialize)]
pub struct CondensedScore {
    pub value: f64,
    /// Row-major, same shape as the score matrix; NaN where the score
    /// itself was NaN.
    pub cells: Vec<f64>,
}

/// Rank-derived overall scores, split into the bounded-absolute and
/// percentile parts of the extended matrix.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RankOverallScores {
    /// Sum of 1/(rank-2) over valid ranks in the bounded absolute rows.
    pub total_score_abs: f64,
    /// Same over the percentile rows.
    pub total_score_percentile: f64,
    /// Fraction of bounded absolute cells not ranked "below no-skill".
    pub success_rate_abs: f64,
    /// Same over the percentile rows.
    pub success_rate_percentile: f64,
}

/// One continuous (window, threshold) sample of the CWFSS sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CwfssSample {
    pub window: usize,
    pub threshold: f64,
    pub numerator: f64,
    pub denominator: f64,
    pub score: f64,
}

/// Ordered bootstrap estimates of the condensed continuous score.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapDistribution {
    pub values: Vec<f64>,
}

impl BootstrapDistribution {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        nan_mean(&self.values)
    }

    pub fn std_dev(&self) -> f64 {
        nan_std(&self.values)
    }
}

/// Rank stability of one forecast across bootstrap resamples.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BootstrapRankSummary {
    pub rank1_frequency: f64,
    pub rank2_frequency: f64,
    pub rank3_frequency: f64,
    pub most_common_rank: u32,
}

/// Plain field-vs-field metrics on the raw (un-thresholded) grids.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContinuousMetrics {
    pub bias: f64,
    pub mae: f64,
    pub rmse: f64,
    pub correlation: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(score: f64) -> ScoreCell {
        ScoreCell {
            numerator: 0.0,
            denominator: 1.0,
            score,
            bias_indicator: 0.0,
        }
    }

    #[test]
    fn test_matrix_shape_is_checked() {
        let cells = vec![cell(1.0); 6];
        assert!(ScoreMatrix::new(vec![0.1, 1.0], vec![5, 11, 21], cells.clone()).is_ok());
        assert!(matches!(
            ScoreMatrix::new(vec![0.1], vec![5, 11, 21], cells),
            Err(VerifError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_concat_rows_requires_equal_windows() {
        let a = ScoreMatrix::new(vec![0.1], vec![5, 11], vec![cell(1.0); 2]).unwrap();
        let b = ScoreMatrix::new(vec![25.0], vec![5, 11], vec![cell(0.5); 2]).unwrap();
        let c = ScoreMatrix::new(vec![25.0], vec![5, 21], vec![cell(0.5); 2]).unwrap();
        let merged = a.clone().concat_rows(b).unwrap();
        assert_eq!(merged.n_thresholds(), 2);
        assert!((merged.cell(1, 0).score - 0.5).abs() < 1e-12);
        assert!(a.concat_rows(c).is_err());
    }

    #[test]
    fn test_bootstrap_distribution_stats() {
        let d = BootstrapDistribution {
            values: vec![0.4, 0.6],
        };
        assert!((d.mean() - 0.5).abs() < 1e-12);
        assert!((d.std_dev() - 0.1).abs() < 1e-12);
    }
}

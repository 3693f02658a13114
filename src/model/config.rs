use serde::Serialize;

use crate::error::VerifError;

/// Terminal "unbounded" threshold sentinel. A row at this threshold has an
/// empty exceedance mask on both fields and scores NaN; it is excluded from
/// the weighted-condensed threshold normalizer.
pub const UNBOUNDED_THRESHOLD: f64 = 99999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregationMode {
    /// Clip the neighborhood at grid borders (shrunken neighborhood).
    Same,
    /// Cells whose full window would leave the grid are NaN.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Weighting {
    Unweighted,
    Weighted,
}

/// How a grid value qualifies for a threshold row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ExceedanceKind {
    /// value > t (the default).
    Over,
    /// value <= t.
    Under,
    /// Rows become bands (t_i, t_{i+1}]; a leading -1 band keeps zeros.
    Between,
    /// value in ((1-tol)*t, (1+tol)*t].
    Tolerance { tolerance: f64 },
}

/// How CWFSS threshold bounds are resolved against the observation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdLimitMode {
    Absolute,
    /// Bounds are percent of the observation maximum.
    RelativeToMax,
    /// Bounds are percentiles of the observation distribution.
    Percentile,
}

/// All recognized verification options, resolved and validated once up
/// front. Downstream code never re-interprets raw settings.
#[derive(Debug, Clone, Serialize)]
pub struct VerifConfig {
    /// Ascending absolute thresholds; the last entry may be
    /// [`UNBOUNDED_THRESHOLD`].
    pub thresholds: Vec<f64>,
    /// Ascending percentiles in (0, 100), resolved per field.
    pub percentile_thresholds: Vec<f64>,
    /// Ascending neighborhood side lengths in cells.
    pub windows: Vec<usize>,
    pub aggregation_mode: AggregationMode,
    pub weighting: Weighting,
    pub exceedance: ExceedanceKind,
    pub cwfss_sample_count: usize,
    pub bootstrap_count: usize,
    pub threshold_limit_mode: ThresholdLimitMode,
    pub cwfss_window_limits: (usize, usize),
    pub cwfss_threshold_limits: (f64, f64),
    /// Window ladder scanned by the displacement metric.
    pub d90_ladder: Vec<usize>,
}

impl Default for VerifConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                0.1,
                1.0,
                5.0,
                10.0,
                25.0,
                35.0,
                50.0,
                75.0,
                100.0,
                UNBOUNDED_THRESHOLD,
            ],
            percentile_thresholds: vec![25.0, 50.0, 75.0, 90.0, 95.0],
            windows: vec![10, 20, 30, 40, 60, 80, 100, 120, 140, 160, 180, 200],
            aggregation_mode: AggregationMode::Same,
            weighting: Weighting::Unweighted,
            exceedance: ExceedanceKind::Over,
            cwfss_sample_count: 500,
            bootstrap_count: 500,
            threshold_limit_mode: ThresholdLimitMode::RelativeToMax,
            cwfss_window_limits: (10, 200),
            cwfss_threshold_limits: (0.1, 100.0),
            d90_ladder: vec![
                1, 3, 5, 7, 11, 21, 31, 41, 51, 61, 81, 101, 121, 141, 181, 251, 351, 501, 701,
            ],
        }
    }
}

impl VerifConfig {
    pub fn validate(&self) -> Result<(), VerifError> {
        if self.thresholds.is_empty() {
            return Err(VerifError::InvalidParameter(
                "threshold list is empty".to_string(),
            ));
        }
        if !ascending(&self.thresholds) {
            return Err(VerifError::InvalidParameter(
                "thresholds must be strictly ascending".to_string(),
            ));
        }
        if !ascending(&self.percentile_thresholds) {
            return Err(VerifError::InvalidParameter(
                "percentile thresholds must be strictly ascending".to_string(),
            ));
        }
        if self
            .percentile_thresholds
            .iter()
            .any(|&p| !(p > 0.0 && p < 100.0))
        {
            return Err(VerifError::InvalidParameter(
                "percentile thresholds must lie in (0, 100)".to_string(),
            ));
        }
        if self.windows.is_empty() || self.windows.iter().any(|&w| w == 0) {
            return Err(VerifError::InvalidParameter(
                "window list must be non-empty with positive sizes".to_string(),
            ));
        }
        if self.windows.windows(2).any(|p| p[1] <= p[0]) {
            return Err(VerifError::InvalidParameter(
                "windows must be strictly ascending".to_string(),
            ));
        }
        if let ExceedanceKind::Tolerance { tolerance } = self.exceedance {
            if !(tolerance > 0.0 && tolerance < 1.0) {
                return Err(VerifError::InvalidParameter(format!(
                    "tolerance must lie in (0, 1), got {tolerance}"
                )));
            }
        }
        let (wmin, wmax) = self.cwfss_window_limits;
        if wmin == 0 || wmax < wmin {
            return Err(VerifError::InvalidParameter(format!(
                "cwfss window limits must satisfy 1 <= min <= max, got ({wmin}, {wmax})"
            )));
        }
        let (tmin, tmax) = self.cwfss_threshold_limits;
        if !(tmin.is_finite() && tmax.is_finite()) || tmax < tmin {
            return Err(VerifError::InvalidParameter(format!(
                "cwfss threshold limits must be finite and ordered, got ({tmin}, {tmax})"
            )));
        }
        if self.cwfss_sample_count == 0 {
            return Err(VerifError::InvalidParameter(
                "cwfss sample count must be positive".to_string(),
            ));
        }
        if self.d90_ladder.is_empty() || self.d90_ladder.windows(2).any(|p| p[1] <= p[0]) {
            return Err(VerifError::InvalidParameter(
                "d90 ladder must be non-empty and strictly ascending".to_string(),
            ));
        }
        if self.d90_ladder[0] == 0 {
            return Err(VerifError::InvalidParameter(
                "d90 ladder windows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest bounded absolute threshold: the normalizer of the weighted
    /// condensed threshold weight. Percentile rows and the unbounded
    /// sentinel never enter this maximum.
    pub fn bounded_threshold_max(&self) -> f64 {
        self.thresholds
            .iter()
            .copied()
            .filter(|&t| t < UNBOUNDED_THRESHOLD)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

fn ascending(values: &[f64]) -> bool {
    values.windows(2).all(|p| p[1] > p[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VerifConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unsorted_thresholds() {
        let mut config = VerifConfig::default();
        config.thresholds = vec![1.0, 0.5];
        assert!(matches!(
            config.validate(),
            Err(VerifError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = VerifConfig::default();
        config.windows = vec![0, 10];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounded_threshold_max_skips_sentinel() {
        let config = VerifConfig::default();
        assert!((config.bounded_threshold_max() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        let mut config = VerifConfig::default();
        config.exceedance = ExceedanceKind::Tolerance { tolerance: 1.5 };
        assert!(config.validate().is_err());
    }
}

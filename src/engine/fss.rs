use rayon::prelude::*;

use crate::engine::window::IntegralTable;
use crate::error::VerifError;
use crate::model::config::{AggregationMode, ExceedanceKind, VerifConfig};
use crate::model::grid::{Grid, Mask};
use crate::model::scores::{ScoreCell, ScoreMatrix};

/// Threshold x window FSS matrix for one forecast/observation pair at
/// literal threshold values.
pub fn fss_matrix(
    fcst: &Grid,
    obs: &Grid,
    thresholds: &[f64],
    windows: &[usize],
    mode: AggregationMode,
    kind: ExceedanceKind,
) -> Result<ScoreMatrix, VerifError> {
    check_shapes(fcst, obs)?;
    let bands = threshold_bands(thresholds, kind);
    let rows: Vec<Vec<ScoreCell>> = bands
        .par_iter()
        .map(|band| {
            let fc_mask = band_mask(fcst, kind, band.lower, band.upper);
            let obs_mask = band_mask(obs, kind, band.lower, band.upper);
            score_row(&fc_mask, &obs_mask, windows, mode)
        })
        .collect::<Result<_, _>>()?;
    let labels = bands.iter().map(|b| b.label).collect();
    ScoreMatrix::new(labels, windows.to_vec(), rows.concat())
}

/// Percentile-threshold FSS matrix: each percentile is resolved to a
/// literal value from each field's own distribution before comparison.
pub fn fss_matrix_percentile(
    fcst: &Grid,
    obs: &Grid,
    percentiles: &[f64],
    windows: &[usize],
    mode: AggregationMode,
) -> Result<ScoreMatrix, VerifError> {
    check_shapes(fcst, obs)?;
    let rows: Vec<Vec<ScoreCell>> = percentiles
        .par_iter()
        .map(|&p| {
            let fc_mask = fcst.mask_over(fcst.percentile(p));
            let obs_mask = obs.mask_over(obs.percentile(p));
            score_row(&fc_mask, &obs_mask, windows, mode)
        })
        .collect::<Result<_, _>>()?;
    ScoreMatrix::new(percentiles.to_vec(), windows.to_vec(), rows.concat())
}

/// Extended matrix: absolute-threshold rows first, percentile rows below.
pub fn extended_fss_matrix(
    fcst: &Grid,
    obs: &Grid,
    config: &VerifConfig,
) -> Result<ScoreMatrix, VerifError> {
    let absolute = fss_matrix(
        fcst,
        obs,
        &config.thresholds,
        &config.windows,
        config.aggregation_mode,
        config.exceedance,
    )?;
    if config.percentile_thresholds.is_empty() {
        return Ok(absolute);
    }
    let percentile = fss_matrix_percentile(
        fcst,
        obs,
        &config.percentile_thresholds,
        &config.windows,
        config.aggregation_mode,
    )?;
    absolute.concat_rows(percentile)
}

/// No-skill values for literal threshold rows: 0.5 * (1 + f0) with f0 the
/// observation's base rate under the row's exceedance rule.
pub fn no_skill_thresholds(obs: &Grid, thresholds: &[f64], kind: ExceedanceKind) -> Vec<f64> {
    threshold_bands(thresholds, kind)
        .iter()
        .map(|band| {
            let f0 = band_mask(obs, kind, band.lower, band.upper).count_set() as f64
                / obs.len() as f64;
            0.5 * (1.0 + f0)
        })
        .collect()
}

/// No-skill values for percentile rows: 0.5 * (1 + p/100).
pub fn no_skill_percentiles(percentiles: &[f64]) -> Vec<f64> {
    percentiles.iter().map(|&p| 0.5 * (1.0 + p / 100.0)).collect()
}

/// No-skill vector matching the extended matrix row order.
pub fn extended_no_skill(obs: &Grid, config: &VerifConfig) -> Vec<f64> {
    let mut out = no_skill_thresholds(obs, &config.thresholds, config.exceedance);
    out.extend(no_skill_percentiles(&config.percentile_thresholds));
    out
}

/// Score a pair of fraction fields: numerator, denominator, score.
/// NaN cells (strict-mode borders) are skipped pairwise.
pub(crate) fn score_fractions(fc: &Grid, obs: &Grid) -> (f64, f64, f64) {
    let mut num_sum = 0.0;
    let mut den_sum = 0.0;
    let mut n = 0usize;
    for (&f, &o) in fc.values().iter().zip(obs.values()) {
        if f.is_nan() || o.is_nan() {
            continue;
        }
        let d = f - o;
        num_sum += d * d;
        den_sum += f * f + o * o;
        n += 1;
    }
    if n == 0 {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let num = num_sum / n as f64;
    let den = den_sum / n as f64;
    let score = if den == 0.0 { f64::NAN } else { 1.0 - num / den };
    (num, den, score)
}

/// One matrix row: the integral table per field is built once and reused
/// across the whole window set.
fn score_row(
    fc_mask: &Mask,
    obs_mask: &Mask,
    windows: &[usize],
    mode: AggregationMode,
) -> Result<Vec<ScoreCell>, VerifError> {
    let fc_table = IntegralTable::new(fc_mask);
    let obs_table = IntegralTable::new(obs_mask);
    let bias_indicator =
        (fc_mask.count_set() as f64 - obs_mask.count_set() as f64) / fc_mask.len() as f64;
    windows
        .iter()
        .map(|&w| {
            let fc_frac = fc_table.fractions(w, mode)?;
            let obs_frac = obs_table.fractions(w, mode)?;
            let (numerator, denominator, score) = score_fractions(&fc_frac, &obs_frac);
            Ok(ScoreCell {
                numerator,
                denominator,
                score,
                bias_indicator,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ThresholdBand {
    label: f64,
    lower: f64,
    upper: f64,
}

fn threshold_bands(thresholds: &[f64], kind: ExceedanceKind) -> Vec<ThresholdBand> {
    match kind {
        ExceedanceKind::Over | ExceedanceKind::Under => thresholds
            .iter()
            .map(|&t| ThresholdBand {
                label: t,
                lower: t,
                upper: f64::NAN,
            })
            .collect(),
        ExceedanceKind::Between => {
            // Leading -1 bound keeps exact zeros inside the first band.
            let mut bounds = Vec::with_capacity(thresholds.len() + 1);
            bounds.push(-1.0);
            bounds.extend_from_slice(thresholds);
            bounds
                .windows(2)
                .map(|p| ThresholdBand {
                    label: p[1],
                    lower: p[0],
                    upper: p[1],
                })
                .collect()
        }
        ExceedanceKind::Tolerance { tolerance } => thresholds
            .iter()
            .map(|&t| ThresholdBand {
                label: t,
                lower: (1.0 - tolerance) * t,
                upper: (1.0 + tolerance) * t,
            })
            .collect(),
    }
}

fn band_mask(grid: &Grid, kind: ExceedanceKind, lower: f64, upper: f64) -> Mask {
    match kind {
        ExceedanceKind::Over => grid.mask_over(lower),
        ExceedanceKind::Under => grid.mask_under(lower),
        ExceedanceKind::Between | ExceedanceKind::Tolerance { .. } => {
            grid.mask_between(lower, upper)
        }
    }
}

fn check_shapes(fcst: &Grid, obs: &Grid) -> Result<(), VerifError> {
    if !fcst.same_shape(obs) {
        return Err(VerifError::ShapeMismatch(format!(
            "forecast is {:?}, observation is {:?}",
            fcst.shape(),
            obs.shape()
        )));
    }
    Ok(())
}

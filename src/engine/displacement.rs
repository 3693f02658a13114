use tracing::{info, warn};

use crate::engine::fss::fss_matrix;
use crate::engine::window::clamp_window;
use crate::error::VerifError;
use crate::model::config::{AggregationMode, ExceedanceKind};
use crate::model::grid::Grid;

/// Returned when the ladder scores are non-monotonic or never reach half
/// credit. Distinct from the NaN returned for an empty forecast mask;
/// downstream branching depends on which occurred.
pub const D90_SENTINEL: f64 = 9999.0;

/// Displacement metric: grid-cell distance the forecast's top-decile
/// pattern must move to reach half-credit overlap with the observation's.
///
/// Both fields are binarized at their own 90th percentile; the one-sided
/// difference masks are scored against each other over a growing window
/// ladder and the first 0.5 crossing is interpolated. Expected, documented
/// outcomes instead of errors: NaN (with a warning) for an empty forecast
/// mask, [`D90_SENTINEL`] for a non-monotonic ladder or no crossing.
pub fn d90(
    fcst: &Grid,
    obs: &Grid,
    ladder: &[usize],
    mode: AggregationMode,
) -> Result<f64, VerifError> {
    if !fcst.same_shape(obs) {
        return Err(VerifError::ShapeMismatch(format!(
            "forecast is {:?}, observation is {:?}",
            fcst.shape(),
            obs.shape()
        )));
    }
    if ladder.is_empty() {
        return Err(VerifError::InvalidParameter(
            "displacement ladder is empty".to_string(),
        ));
    }
    let fc_mask = fcst.mask_over(fcst.percentile(90.0));
    let obs_mask = obs.mask_over(obs.percentile(90.0));
    if fc_mask.count_set() == 0 {
        warn!("empty top-decile forecast mask, no displacement");
        return Ok(f64::NAN);
    }
    let obs_only = obs_mask.difference(&fc_mask);
    let fc_only = fc_mask.difference(&obs_mask);

    let (ny, nx) = fcst.shape();
    let windows: Vec<usize> = ladder.iter().map(|&w| clamp_window(w, ny, nx)).collect();
    let matrix = fss_matrix(
        &obs_only.to_grid(),
        &fc_only.to_grid(),
        &[0.5],
        &windows,
        mode,
        ExceedanceKind::Over,
    )?;
    let scores = matrix.scores();

    for pair in scores.windows(2) {
        if pair[1] - pair[0] < 0.0 {
            info!("non-monotonic ladder scores, no displacement");
            return Ok(D90_SENTINEL);
        }
    }
    let Some(crossing) = scores.iter().position(|&s| s >= 0.5) else {
        info!("ladder never reaches half credit, no displacement");
        return Ok(D90_SENTINEL);
    };
    let d = if crossing == 0 {
        ladder[0] as f64
    } else {
        let (s0, s1) = (scores[crossing - 1], scores[crossing]);
        if s0.is_nan() {
            info!("undefined ladder score before the crossing, no displacement");
            return Ok(D90_SENTINEL);
        }
        let (w0, w1) = (ladder[crossing - 1] as f64, ladder[crossing] as f64);
        let frac = (0.5 - s0) / (s1 - s0);
        w0 + frac * (w1 - w0)
    };
    Ok(0.5 * d.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Forecast puts its wet decile in one corner, observation in the
    // opposite one, `offset` cells apart along each axis.
    fn shifted_blobs(n: usize, offset: usize) -> (Grid, Grid) {
        let mut fc = vec![0.0; n * n];
        let mut ob = vec![0.0; n * n];
        for i in 0..2 {
            for j in 0..2 {
                fc[i * n + j] = 10.0;
                ob[(i + offset) * n + (j + offset)] = 10.0;
            }
        }
        (
            Grid::from_vec(fc, n, n).unwrap(),
            Grid::from_vec(ob, n, n).unwrap(),
        )
    }

    #[test]
    fn test_nearby_blobs_give_finite_displacement() {
        let (fc, ob) = shifted_blobs(20, 3);
        let ladder = [1, 3, 5, 7, 11, 21, 31];
        let d = d90(&fc, &ob, &ladder, AggregationMode::Same).unwrap();
        assert!(d.is_finite());
        assert!(d != D90_SENTINEL);
        assert!(d > 0.0);
        assert!(d < 31.0);
    }

    #[test]
    fn test_never_overlapping_masks_hit_sentinel() {
        // Ladder stops well short of the separation, so the score never
        // reaches 0.5.
        let (fc, ob) = shifted_blobs(64, 50);
        let ladder = [1, 3, 5];
        let d = d90(&fc, &ob, &ladder, AggregationMode::Same).unwrap();
        assert_eq!(d, D90_SENTINEL);
    }

    #[test]
    fn test_empty_forecast_mask_gives_nan() {
        // A constant forecast has an empty above-90th-percentile mask.
        let fc = Grid::filled(1.0, 10, 10).unwrap();
        let (_, ob) = shifted_blobs(10, 2);
        let d = d90(&fc, &ob, &[1, 3, 5], AggregationMode::Same).unwrap();
        assert!(d.is_nan());
    }

    #[test]
    fn test_identical_fields_small_displacement() {
        let (fc, _) = shifted_blobs(20, 3);
        let d = d90(&fc, &fc.clone(), &[1, 3, 5, 7], AggregationMode::Same).unwrap();
        // Difference masks are empty on both sides; every ladder score is
        // NaN (zero denominator), which is a no-crossing outcome.
        assert_eq!(d, D90_SENTINEL);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let a = Grid::filled(0.0, 4, 4).unwrap();
        let b = Grid::filled(0.0, 5, 4).unwrap();
        assert!(d90(&a, &b, &[1, 3], AggregationMode::Same).is_err());
    }
}

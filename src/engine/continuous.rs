use crate::error::VerifError;
use crate::model::grid::Grid;
use crate::model::scores::ContinuousMetrics;

/// Field-vs-field metrics on the raw grids: bias, MAE, RMSE and Pearson
/// correlation, reduced over cells where both fields are finite.
pub fn continuous_metrics(fcst: &Grid, obs: &Grid) -> Result<ContinuousMetrics, VerifError> {
    if !fcst.same_shape(obs) {
        return Err(VerifError::ShapeMismatch(format!(
            "forecast is {:?}, observation is {:?}",
            fcst.shape(),
            obs.shape()
        )));
    }
    let mut n = 0usize;
    let mut sum_d = 0.0;
    let mut sum_abs = 0.0;
    let mut sum_sq = 0.0;
    let mut sum_f = 0.0;
    let mut sum_o = 0.0;
    for (&f, &o) in fcst.values().iter().zip(obs.values()) {
        if f.is_nan() || o.is_nan() {
            continue;
        }
        let d = f - o;
        sum_d += d;
        sum_abs += d.abs();
        sum_sq += d * d;
        sum_f += f;
        sum_o += o;
        n += 1;
    }
    if n == 0 {
        return Ok(ContinuousMetrics {
            bias: f64::NAN,
            mae: f64::NAN,
            rmse: f64::NAN,
            correlation: f64::NAN,
        });
    }
    let nf = n as f64;
    let (mean_f, mean_o) = (sum_f / nf, sum_o / nf);
    let mut cov = 0.0;
    let mut var_f = 0.0;
    let mut var_o = 0.0;
    for (&f, &o) in fcst.values().iter().zip(obs.values()) {
        if f.is_nan() || o.is_nan() {
            continue;
        }
        let (df, dob) = (f - mean_f, o - mean_o);
        cov += df * dob;
        var_f += df * df;
        var_o += dob * dob;
    }
    let correlation = if var_f > 0.0 && var_o > 0.0 {
        cov / (var_f.sqrt() * var_o.sqrt())
    } else {
        f64::NAN
    };
    Ok(ContinuousMetrics {
        bias: sum_d / nf,
        mae: sum_abs / nf,
        rmse: (sum_sq / nf).sqrt(),
        correlation,
    })
}

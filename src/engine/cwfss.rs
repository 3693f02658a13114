use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::fss::score_fractions;
use crate::engine::window::IntegralTable;
use crate::error::VerifError;
use crate::model::config::{AggregationMode, ThresholdLimitMode, VerifConfig};
use crate::model::grid::{Grid, nan_mean};
use crate::model::scores::{BootstrapDistribution, BootstrapRankSummary, CwfssSample};

// Plastic constant driving the R2 low-discrepancy recurrence.
const R2_G: f64 = 1.32471795724474602596;

/// Deterministic 2D low-discrepancy point for sample index `n`.
fn r2_point(n: usize) -> (f64, f64) {
    let a1 = 1.0 / R2_G;
    let a2 = 1.0 / (R2_G * R2_G);
    let n = n as f64;
    ((0.5 + a1 * n).fract(), (0.5 + a2 * n).fract())
}

/// Continuous-sampling condensed FSS: N reproducible (window, threshold)
/// pairs, each scored as a single FSS cell, condensed into one weighted
/// scalar in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct CwfssScore {
    pub samples: Vec<CwfssSample>,
    pub value: f64,
    /// Resolved window bounds the samples were drawn from.
    pub window_limits: (usize, usize),
    /// Resolved threshold bounds (literal field units).
    pub threshold_limits: (f64, f64),
}

pub fn sample_cwfss(
    fcst: &Grid,
    obs: &Grid,
    config: &VerifConfig,
) -> Result<CwfssScore, VerifError> {
    if !fcst.same_shape(obs) {
        return Err(VerifError::ShapeMismatch(format!(
            "forecast is {:?}, observation is {:?}",
            fcst.shape(),
            obs.shape()
        )));
    }
    let (wmin, wmax) = config.cwfss_window_limits;
    let (lim_lo, lim_hi) = config.cwfss_threshold_limits;
    let (tmin, tmax) = match config.threshold_limit_mode {
        ThresholdLimitMode::Absolute => (lim_lo, lim_hi),
        ThresholdLimitMode::RelativeToMax => {
            let max = obs.nan_max();
            (lim_lo * max / 100.0, lim_hi * max / 100.0)
        }
        ThresholdLimitMode::Percentile => (obs.percentile(lim_lo), obs.percentile(lim_hi)),
    };
    if !(tmin.is_finite() && tmax.is_finite()) {
        warn!("degenerate observation field, threshold bounds unresolved");
        return Ok(CwfssScore {
            samples: Vec::new(),
            value: f64::NAN,
            window_limits: (wmin, wmax),
            threshold_limits: (tmin, tmax),
        });
    }
    debug!(
        "drawing {} cwfss samples from windows [{wmin}, {wmax}], thresholds [{tmin:.3}, {tmax:.3}]",
        config.cwfss_sample_count
    );
    let samples: Vec<CwfssSample> = (0..config.cwfss_sample_count)
        .into_par_iter()
        .map(|n| {
            let (x, y) = r2_point(n);
            let window = (wmin as f64 + x * (wmax - wmin) as f64) as usize;
            let threshold = tmin + y * (tmax - tmin);
            sample_score(fcst, obs, threshold, window, config.aggregation_mode)
        })
        .collect::<Result<_, _>>()?;
    let all: Vec<usize> = (0..samples.len()).collect();
    let value = weighted_ratio(&samples, &all, tmax, wmax);
    Ok(CwfssScore {
        samples,
        value,
        window_limits: (wmin, wmax),
        threshold_limits: (tmin, tmax),
    })
}

fn sample_score(
    fcst: &Grid,
    obs: &Grid,
    threshold: f64,
    window: usize,
    mode: AggregationMode,
) -> Result<CwfssSample, VerifError> {
    let fc_frac = IntegralTable::new(&fcst.mask_over(threshold)).fractions(window, mode)?;
    let obs_frac = IntegralTable::new(&obs.mask_over(threshold)).fractions(window, mode)?;
    let (numerator, denominator, score) = score_fractions(&fc_frac, &obs_frac);
    Ok(CwfssSample {
        window,
        threshold,
        numerator,
        denominator,
        score,
    })
}

/// Weighted mean of clamp[0,1](2*(score-0.5)) over the indexed samples,
/// normalized by the mean of the weights alone. NaN-scored samples drop
/// out of the numerator but their weights stay in the normalizer.
fn weighted_ratio(samples: &[CwfssSample], indices: &[usize], tmax: f64, wmax: usize) -> f64 {
    let mut weighted = Vec::with_capacity(indices.len());
    let mut weights = Vec::with_capacity(indices.len());
    for &i in indices {
        let s = &samples[i];
        let t_factor = (tmax + s.threshold) / tmax;
        let w_factor = 2.0 * wmax as f64 / (wmax as f64 + s.window as f64);
        let credit = clamp01(2.0 * (s.score - 0.5));
        weighted.push(credit * t_factor * w_factor);
        weights.push(t_factor * w_factor);
    }
    nan_mean(&weighted) / nan_mean(&weights)
}

/// Bootstrap robustness: B deterministic index-resamples with replacement
/// of the already-computed samples; the weighted condensed score is
/// recomputed per resample. Pairs are never regenerated.
pub fn bootstrap_cwfss(cwfss: &CwfssScore, resamples: usize) -> BootstrapDistribution {
    let n = cwfss.samples.len();
    if n == 0 {
        return BootstrapDistribution {
            values: vec![f64::NAN; resamples],
        };
    }
    let tmax = cwfss.threshold_limits.1;
    let wmax = cwfss.window_limits.1;
    let values = (0..resamples)
        .into_par_iter()
        .map(|b| {
            let mut rng = SplitMix64::new(b as u64);
            let idx: Vec<usize> = (0..n).map(|_| (rng.next_u64() % n as u64) as usize).collect();
            weighted_ratio(&cwfss.samples, &idx, tmax, wmax)
        })
        .collect();
    BootstrapDistribution { values }
}

/// Per-resample ranks across forecasts (stable descending order, ties by
/// insertion order), condensed into rank frequencies per forecast.
pub fn bootstrap_rank_summary(
    distributions: &[&BootstrapDistribution],
) -> Result<Vec<BootstrapRankSummary>, VerifError> {
    let Some(first) = distributions.first() else {
        return Ok(Vec::new());
    };
    if distributions.iter().any(|d| d.len() != first.len()) {
        return Err(VerifError::ShapeMismatch(
            "bootstrap distributions differ in length".to_string(),
        ));
    }
    let k = distributions.len();
    let b = first.len();
    let mut rank_counts = vec![vec![0usize; k]; k];
    let mut order: Vec<usize> = Vec::with_capacity(k);
    for resample in 0..b {
        order.clear();
        order.extend(0..k);
        order.sort_by(|&x, &y| {
            let (vx, vy) = (
                distributions[x].values[resample],
                distributions[y].values[resample],
            );
            vy.partial_cmp(&vx).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (position, &forecast) in order.iter().enumerate() {
            rank_counts[forecast][position] += 1;
        }
    }
    Ok(rank_counts
        .iter()
        .map(|counts| {
            let freq = |rank: usize| {
                if rank < k && b > 0 {
                    counts[rank] as f64 / b as f64
                } else {
                    0.0
                }
            };
            let most_common = counts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                .map(|(rank, _)| rank as u32 + 1)
                .unwrap_or(0);
            BootstrapRankSummary {
                rank1_frequency: freq(0),
                rank2_frequency: freq(1),
                rank3_frequency: freq(2),
                most_common_rank: most_common,
            }
        })
        .collect())
}

fn clamp01(x: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

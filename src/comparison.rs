use serde::Serialize;
use tracing::{info, warn};

use crate::engine::continuous::continuous_metrics;
use crate::engine::cwfss::{CwfssScore, bootstrap_cwfss, bootstrap_rank_summary, sample_cwfss};
use crate::engine::displacement::d90;
use crate::engine::fss::{extended_fss_matrix, extended_no_skill};
use crate::engine::ranking::{
    condensed_score, condensed_score_weighted, overall_rank_scores, rank_across_forecasts,
};
use crate::error::VerifError;
use crate::model::config::{UNBOUNDED_THRESHOLD, VerifConfig, Weighting};
use crate::model::grid::Grid;
use crate::model::scores::{
    BootstrapDistribution, BootstrapRankSummary, CondensedScore, ContinuousMetrics, RankMatrix,
    RankOverallScores, ScoreMatrix,
};

/// One competing forecast entering a comparison.
#[derive(Debug, Clone)]
pub struct ComparisonInput<'a> {
    pub name: String,
    pub forecast: &'a Grid,
}

/// Everything scored for a single forecast against the observation.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastScores {
    pub name: String,
    /// Extended matrix: absolute-threshold rows, then percentile rows.
    pub matrix: ScoreMatrix,
    pub continuous: ContinuousMetrics,
    pub condensed: CondensedScore,
    pub condensed_weighted: CondensedScore,
    /// Displacement metric; NaN or the 9999 sentinel on the documented
    /// degenerate outcomes.
    pub d90: f64,
    pub cwfss: CwfssScore,
    pub bootstrap: BootstrapDistribution,
}

impl ForecastScores {
    fn condensed_value(&self, weighting: Weighting) -> f64 {
        match weighting {
            Weighting::Unweighted => self.condensed.value,
            Weighting::Weighted => self.condensed_weighted.value,
        }
    }
}

/// Cross-forecast ranks of the scalar metrics; 1 is best. The condensed
/// rank uses the variant selected by the configured weighting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricRanks {
    pub bias: u32,
    pub mae: u32,
    pub rmse: u32,
    pub correlation: u32,
    pub d90: u32,
    pub condensed: u32,
    pub cwfss: u32,
    /// Mean of the bias/MAE/RMSE/correlation ranks.
    pub average: f64,
    pub average_rank: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedForecast {
    pub scores: ForecastScores,
    pub ranks: RankMatrix,
    /// Row-major relative scores for visualization.
    pub relative: Vec<f64>,
    pub overall: RankOverallScores,
    pub metric_ranks: MetricRanks,
    pub bootstrap_rank: BootstrapRankSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonOutput {
    pub forecasts: Vec<RankedForecast>,
    /// Forecasts excluded after a shape mismatch; the comparison proceeds
    /// without them.
    pub excluded: Vec<String>,
    /// No-skill vector matching the extended matrix rows.
    pub no_skill: Vec<f64>,
    /// Largest per-cell rank awarded to any forecast.
    pub max_rank: u32,
}

/// Score one forecast against the observation: extended FSS matrix,
/// continuous metrics, condensed scores, displacement and the continuous
/// sampler with its bootstrap.
pub fn score_forecast(
    name: &str,
    fcst: &Grid,
    obs: &Grid,
    config: &VerifConfig,
) -> Result<ForecastScores, VerifError> {
    info!("scoring forecast {name}");
    let matrix = extended_fss_matrix(fcst, obs, config)?;
    let continuous = continuous_metrics(fcst, obs)?;
    let no_skill = extended_no_skill(obs, config);
    let condensed = condensed_score(&matrix, &no_skill)?;
    let condensed_weighted =
        condensed_score_weighted(&matrix, &no_skill, config.bounded_threshold_max())?;
    let displacement = d90(fcst, obs, &config.d90_ladder, config.aggregation_mode)?;
    let cwfss = sample_cwfss(fcst, obs, config)?;
    let bootstrap = bootstrap_cwfss(&cwfss, config.bootstrap_count);
    Ok(ForecastScores {
        name: name.to_string(),
        matrix,
        continuous,
        condensed,
        condensed_weighted,
        d90: displacement,
        cwfss,
        bootstrap,
    })
}

/// Score and rank a set of competing forecasts against one observation.
///
/// Configuration errors abort the whole case before any forecast is
/// scored. A forecast failing with a shape mismatch is logged and
/// excluded; the remaining forecasts are ranked without it.
pub fn compare_forecasts(
    inputs: &[ComparisonInput<'_>],
    obs: &Grid,
    config: &VerifConfig,
) -> Result<ComparisonOutput, VerifError> {
    config.validate()?;
    let no_skill = extended_no_skill(obs, config);

    let mut scored: Vec<ForecastScores> = Vec::with_capacity(inputs.len());
    let mut excluded = Vec::new();
    for input in inputs {
        match score_forecast(&input.name, input.forecast, obs, config) {
            Ok(s) => scored.push(s),
            Err(VerifError::ShapeMismatch(msg)) => {
                warn!("excluding forecast {} from ranking: {msg}", input.name);
                excluded.push(input.name.clone());
            }
            Err(e) => return Err(e),
        }
    }

    let matrices: Vec<&ScoreMatrix> = scored.iter().map(|s| &s.matrix).collect();
    let ranking = rank_across_forecasts(&matrices, &no_skill)?;
    let distributions: Vec<&BootstrapDistribution> =
        scored.iter().map(|s| &s.bootstrap).collect();
    let bootstrap_ranks = bootstrap_rank_summary(&distributions)?;
    let metric_ranks = all_metric_ranks(&scored, config.weighting);

    let n_bounded = config
        .thresholds
        .iter()
        .filter(|&&t| t < UNBOUNDED_THRESHOLD)
        .count();
    let n_absolute = config.thresholds.len();

    let max_rank = ranking.ranks.iter().map(RankMatrix::max_rank).max().unwrap_or(0);
    let forecasts = scored
        .into_iter()
        .zip(ranking.ranks)
        .zip(ranking.relative)
        .zip(bootstrap_ranks)
        .zip(metric_ranks)
        .map(|((((scores, ranks), relative), bootstrap_rank), metric_ranks)| {
            let overall = overall_rank_scores(&ranks, n_bounded, n_absolute);
            RankedForecast {
                scores,
                ranks,
                relative,
                overall,
                metric_ranks,
                bootstrap_rank,
            }
        })
        .collect();
    Ok(ComparisonOutput {
        forecasts,
        excluded,
        no_skill,
        max_rank,
    })
}

/// Per-metric forecast ranks: ascending for error-like metrics (absolute
/// bias, MAE, RMSE, displacement), descending for skill-like ones. Ties
/// keep insertion order; NaN sorts last.
fn all_metric_ranks(scored: &[ForecastScores], weighting: Weighting) -> Vec<MetricRanks> {
    let bias = rank_by(scored, |s| s.continuous.bias.abs(), true);
    let mae = rank_by(scored, |s| s.continuous.mae, true);
    let rmse = rank_by(scored, |s| s.continuous.rmse, true);
    let correlation = rank_by(scored, |s| s.continuous.correlation, false);
    let displacement = rank_by(scored, |s| s.d90, true);
    let condensed = rank_by(scored, |s| s.condensed_value(weighting), false);
    let cwfss = rank_by(scored, |s| s.cwfss.value, false);
    let averages: Vec<f64> = (0..scored.len())
        .map(|i| 0.25 * (bias[i] + mae[i] + rmse[i] + correlation[i]) as f64)
        .collect();
    let average_ranks = rank_values(&averages, true);
    (0..scored.len())
        .map(|i| MetricRanks {
            bias: bias[i],
            mae: mae[i],
            rmse: rmse[i],
            correlation: correlation[i],
            d90: displacement[i],
            condensed: condensed[i],
            cwfss: cwfss[i],
            average: averages[i],
            average_rank: average_ranks[i],
        })
        .collect()
}

fn rank_by<F: Fn(&ForecastScores) -> f64>(
    scored: &[ForecastScores],
    key: F,
    ascending: bool,
) -> Vec<u32> {
    rank_values(&scored.iter().map(key).collect::<Vec<_>>(), ascending)
}

fn rank_values(values: &[f64], ascending: bool) -> Vec<u32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let (va, vb) = (values[a], values[b]);
        match (va.is_nan(), vb.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => {
                let ord = va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal);
                if ascending { ord } else { ord.reverse() }
            }
        }
    });
    let mut ranks = vec![0u32; values.len()];
    for (position, &idx) in order.iter().enumerate() {
        ranks[idx] = position as u32 + 1;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ThresholdLimitMode;

    fn test_config() -> VerifConfig {
        VerifConfig {
            thresholds: vec![0.5, 2.0, UNBOUNDED_THRESHOLD],
            percentile_thresholds: vec![50.0, 90.0],
            windows: vec![1, 3, 5],
            cwfss_sample_count: 32,
            bootstrap_count: 16,
            cwfss_window_limits: (1, 7),
            cwfss_threshold_limits: (10.0, 90.0),
            threshold_limit_mode: ThresholdLimitMode::RelativeToMax,
            d90_ladder: vec![1, 3, 5, 7, 11],
            ..VerifConfig::default()
        }
    }

    fn blob(top: usize, left: usize, size: usize) -> Grid {
        let mut v = vec![0.0; 144];
        for i in top..(top + size).min(12) {
            for j in left..(left + size).min(12) {
                v[i * 12 + j] = 3.0;
            }
        }
        Grid::from_vec(v, 12, 12).unwrap()
    }

    #[test]
    fn test_comparison_ranks_better_forecast_first() {
        let obs = blob(4, 4, 4);
        let close = blob(5, 5, 4);
        let far = blob(0, 0, 3);
        let inputs = [
            ComparisonInput {
                name: "close".to_string(),
                forecast: &close,
            },
            ComparisonInput {
                name: "far".to_string(),
                forecast: &far,
            },
        ];
        let out = compare_forecasts(&inputs, &obs, &test_config()).unwrap();
        assert_eq!(out.forecasts.len(), 2);
        assert!(out.excluded.is_empty());
        assert_eq!(out.no_skill.len(), 5);
        let close_scores = &out.forecasts[0];
        let far_scores = &out.forecasts[1];
        assert!(close_scores.scores.condensed.value > far_scores.scores.condensed.value);
        assert_eq!(close_scores.metric_ranks.condensed, 1);
        assert_eq!(far_scores.metric_ranks.condensed, 2);
        assert!(out.max_rank >= 3);
    }

    #[test]
    fn test_shape_mismatch_excludes_but_continues() {
        let obs = blob(4, 4, 4);
        let good = blob(5, 5, 4);
        let bad = Grid::filled(1.0, 10, 10).unwrap();
        let inputs = [
            ComparisonInput {
                name: "good".to_string(),
                forecast: &good,
            },
            ComparisonInput {
                name: "bad".to_string(),
                forecast: &bad,
            },
        ];
        let out = compare_forecasts(&inputs, &obs, &test_config()).unwrap();
        assert_eq!(out.forecasts.len(), 1);
        assert_eq!(out.excluded, vec!["bad".to_string()]);
        assert_eq!(out.forecasts[0].scores.name, "good");
    }

    #[test]
    fn test_invalid_config_aborts_whole_case() {
        let obs = blob(4, 4, 4);
        let fc = blob(5, 5, 4);
        let inputs = [ComparisonInput {
            name: "fc".to_string(),
            forecast: &fc,
        }];
        let mut config = test_config();
        config.windows = vec![0];
        assert!(matches!(
            compare_forecasts(&inputs, &obs, &config),
            Err(VerifError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rank_values_nan_sorts_last() {
        let ranks = rank_values(&[0.3, f64::NAN, 0.1], true);
        assert_eq!(ranks, vec![2, 3, 1]);
        let ranks = rank_values(&[0.3, f64::NAN, 0.1], false);
        assert_eq!(ranks, vec![1, 3, 2]);
    }

    #[test]
    fn test_single_forecast_comparison() {
        let obs = blob(4, 4, 4);
        let fc = blob(5, 5, 4);
        let inputs = [ComparisonInput {
            name: "only".to_string(),
            forecast: &fc,
        }];
        let out = compare_forecasts(&inputs, &obs, &test_config()).unwrap();
        let ranked = &out.forecasts[0];
        assert_eq!(ranked.metric_ranks.mae, 1);
        assert_eq!(ranked.metric_ranks.average_rank, 1);
        assert_eq!(ranked.bootstrap_rank.most_common_rank, 1);
    }
}

//! Spatial-verification scoring engine for gridded forecasts.
//!
//! The crate compares already-resampled 2D forecast and observation grids
//! and produces the score and rank structures used to compare competing
//! forecasts: neighborhood fractional skill scores over a threshold x
//! window matrix, per-cell cross-forecast ranking, condensed scalar
//! scores, a displacement metric, a continuous-sampling robustness score
//! with bootstrap, and ensemble skill metrics. No I/O happens here; data
//! loading, resampling and rendering live with the callers.
//!
//! Everything is deterministic: repeated invocations on the same inputs
//! reproduce results to the bit, including the low-discrepancy sampler
//! and the bootstrap draws.

pub mod comparison;
pub mod engine;
pub mod error;
pub mod model;

pub use comparison::{
    ComparisonInput, ComparisonOutput, ForecastScores, MetricRanks, RankedForecast,
    compare_forecasts, score_forecast,
};
pub use engine::continuous::continuous_metrics;
pub use engine::cwfss::{CwfssScore, bootstrap_cwfss, bootstrap_rank_summary, sample_cwfss};
pub use engine::displacement::{D90_SENTINEL, d90};
pub use engine::ensemble::{
    DfssSpread, EnsembleMemberSet, EnsembleScores, score_ensemble,
};
pub use engine::fss::{
    extended_fss_matrix, extended_no_skill, fss_matrix, fss_matrix_percentile,
    no_skill_percentiles, no_skill_thresholds,
};
pub use engine::ranking::{
    BELOW_NO_SKILL_RELATIVE, CellRanking, condensed_score, condensed_score_weighted,
    overall_rank_scores, rank_across_forecasts, rank_scores, relative_scores,
};
pub use engine::window::{fraction_field, fraction_field_direct};
pub use error::VerifError;
pub use model::{
    AggregationMode, BootstrapDistribution, BootstrapRankSummary, CondensedScore,
    ContinuousMetrics, CwfssSample, ExceedanceKind, Grid, Mask, RankMatrix, RankOverallScores,
    ScoreCell, ScoreMatrix, ThresholdLimitMode, UNBOUNDED_THRESHOLD, VerifConfig, Weighting,
};

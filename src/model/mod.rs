pub mod config;
pub mod grid;
pub mod scores;

pub use config::{
    AggregationMode, ExceedanceKind, ThresholdLimitMode, UNBOUNDED_THRESHOLD, VerifConfig,
    Weighting,
};
pub use grid::{Grid, Mask};
pub use scores::{
    BootstrapDistribution, BootstrapRankSummary, CondensedScore, ContinuousMetrics, CwfssSample,
    RankMatrix, RankOverallScores, ScoreCell, ScoreMatrix,
};

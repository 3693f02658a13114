use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::engine::fss::{fss_matrix, score_fractions};
use crate::engine::window::IntegralTable;
use crate::error::VerifError;
use crate::model::config::{AggregationMode, ExceedanceKind};
use crate::model::grid::{Grid, nan_mean, nan_std};
use crate::model::scores::{ScoreCell, ScoreMatrix};

/// K ensemble member fields plus the observation, shape-checked once.
#[derive(Debug, Clone)]
pub struct EnsembleMemberSet {
    members: Vec<Grid>,
    observation: Grid,
}

impl EnsembleMemberSet {
    pub fn new(members: Vec<Grid>, observation: Grid) -> Result<Self, VerifError> {
        if members.is_empty() {
            return Err(VerifError::InvalidParameter(
                "ensemble needs at least one member".to_string(),
            ));
        }
        for (k, m) in members.iter().enumerate() {
            if !m.same_shape(&observation) {
                return Err(VerifError::ShapeMismatch(format!(
                    "member {} is {:?}, observation is {:?}",
                    k,
                    m.shape(),
                    observation.shape()
                )));
            }
        }
        Ok(Self {
            members,
            observation,
        })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Grid] {
        &self.members
    }

    pub fn observation(&self) -> &Grid {
        &self.observation
    }
}

/// Cell-wise spread of the pairwise member-vs-member FSS matrices.
#[derive(Debug, Clone, Serialize)]
pub struct DfssSpread {
    pub thresholds: Vec<f64>,
    pub windows: Vec<usize>,
    /// Row-major nan-aware mean across member pairs.
    pub mean: Vec<f64>,
    /// Row-major population standard deviation across member pairs.
    pub std: Vec<f64>,
    pub pair_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsembleScores {
    /// Probabilistic FSS: member exceedance fractions averaged per cell.
    pub pfss: ScoreMatrix,
    /// Ensemble-mean FSS: the member mean field thresholded after averaging.
    pub emfss: ScoreMatrix,
    pub dfss: DfssSpread,
    /// Energy-form CRPS field.
    pub crps: Grid,
}

pub fn score_ensemble(
    ensemble: &EnsembleMemberSet,
    thresholds: &[f64],
    windows: &[usize],
    mode: AggregationMode,
) -> Result<EnsembleScores, VerifError> {
    debug!(
        "scoring {}-member ensemble over {} thresholds x {} windows",
        ensemble.member_count(),
        thresholds.len(),
        windows.len()
    );
    let pfss = probabilistic_fss(ensemble, thresholds, windows, mode)?;
    let emfss = fss_matrix(
        &member_mean(ensemble.members())?,
        ensemble.observation(),
        thresholds,
        windows,
        mode,
        ExceedanceKind::Over,
    )?;
    let dfss = pairwise_spread(ensemble.members(), thresholds, windows, mode)?;
    let crps = crps_field(ensemble)?;
    Ok(EnsembleScores {
        pfss,
        emfss,
        dfss,
        crps,
    })
}

/// pFSS: the forecast fraction per (threshold, window) is the mean across
/// members of each member's own windowed exceedance fraction.
fn probabilistic_fss(
    ensemble: &EnsembleMemberSet,
    thresholds: &[f64],
    windows: &[usize],
    mode: AggregationMode,
) -> Result<ScoreMatrix, VerifError> {
    let obs = ensemble.observation();
    let k = ensemble.member_count() as f64;
    let rows: Vec<Vec<ScoreCell>> = thresholds
        .par_iter()
        .map(|&t| {
            let obs_mask = obs.mask_over(t);
            let obs_table = IntegralTable::new(&obs_mask);
            let member_masks: Vec<_> =
                ensemble.members().iter().map(|m| m.mask_over(t)).collect();
            let member_tables: Vec<_> = member_masks.iter().map(IntegralTable::new).collect();
            let mean_count =
                member_masks.iter().map(|m| m.count_set() as f64).sum::<f64>() / k;
            let bias_indicator =
                (mean_count - obs_mask.count_set() as f64) / obs.len() as f64;
            windows
                .iter()
                .map(|&w| {
                    let obs_frac = obs_table.fractions(w, mode)?;
                    let mut mean_frac = vec![0.0f64; obs.len()];
                    for table in &member_tables {
                        let frac = table.fractions(w, mode)?;
                        for (acc, &v) in mean_frac.iter_mut().zip(frac.values()) {
                            *acc += v / k;
                        }
                    }
                    let mean_frac = Grid::from_vec(mean_frac, obs.ny(), obs.nx())?;
                    let (numerator, denominator, score) =
                        score_fractions(&mean_frac, &obs_frac);
                    Ok(ScoreCell {
                        numerator,
                        denominator,
                        score,
                        bias_indicator,
                    })
                })
                .collect::<Result<Vec<_>, VerifError>>()
        })
        .collect::<Result<_, _>>()?;
    ScoreMatrix::new(thresholds.to_vec(), windows.to_vec(), rows.concat())
}

/// Per-cell mean across members; NaN propagates.
fn member_mean(members: &[Grid]) -> Result<Grid, VerifError> {
    let (ny, nx) = members[0].shape();
    let k = members.len() as f64;
    let mut out = vec![0.0f64; ny * nx];
    for m in members {
        for (acc, &v) in out.iter_mut().zip(m.values()) {
            *acc += v / k;
        }
    }
    Grid::from_vec(out, ny, nx)
}

/// dFSS: every unordered member pair scored directly against each other,
/// independent of the observation; ensemble-spread proxy.
fn pairwise_spread(
    members: &[Grid],
    thresholds: &[f64],
    windows: &[usize],
    mode: AggregationMode,
) -> Result<DfssSpread, VerifError> {
    let k = members.len();
    let pairs: Vec<(usize, usize)> = (0..k)
        .flat_map(|i| ((i + 1)..k).map(move |j| (i, j)))
        .collect();
    let pair_scores: Vec<Vec<f64>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            fss_matrix(
                &members[i],
                &members[j],
                thresholds,
                windows,
                mode,
                ExceedanceKind::Over,
            )
            .map(|m| m.scores())
        })
        .collect::<Result<_, _>>()?;
    let n_cells = thresholds.len() * windows.len();
    let mut mean = vec![f64::NAN; n_cells];
    let mut std = vec![f64::NAN; n_cells];
    let mut across = vec![0.0f64; pairs.len()];
    for cell in 0..n_cells {
        for (p, scores) in pair_scores.iter().enumerate() {
            across[p] = scores[cell];
        }
        mean[cell] = nan_mean(&across);
        std[cell] = nan_std(&across);
    }
    Ok(DfssSpread {
        thresholds: thresholds.to_vec(),
        windows: windows.to_vec(),
        mean,
        std,
        pair_count: pairs.len(),
    })
}

/// Energy-form CRPS per cell: mean member-vs-observation distance minus
/// half the mean distance over all ordered member pairs (self-pairs
/// included, contributing zero).
fn crps_field(ensemble: &EnsembleMemberSet) -> Result<Grid, VerifError> {
    let obs = ensemble.observation();
    let members = ensemble.members();
    let k = members.len() as f64;
    let (ny, nx) = obs.shape();
    let mut term1 = vec![0.0f64; obs.len()];
    for m in members {
        for (acc, (&v, &o)) in term1.iter_mut().zip(m.values().iter().zip(obs.values())) {
            *acc += (v - o).abs() / k;
        }
    }
    let mut pair_sum = vec![0.0f64; obs.len()];
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            for (acc, (&a, &b)) in pair_sum
                .iter_mut()
                .zip(members[i].values().iter().zip(members[j].values()))
            {
                *acc += (a - b).abs();
            }
        }
    }
    // Unordered pairs doubled over the K^2 ordered pairs, halved: / K^2.
    let out = term1
        .iter()
        .zip(&pair_sum)
        .map(|(&t1, &ps)| t1 - ps / (k * k))
        .collect();
    Grid::from_vec(out, ny, nx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banded(level: f64) -> Grid {
        let mut v = vec![0.0; 100];
        for i in 0..10 {
            for j in 0..5 {
                v[i * 10 + j] = level;
            }
        }
        Grid::from_vec(v, 10, 10).unwrap()
    }

    #[test]
    fn test_identical_members_dfss_is_one() {
        let ensemble = EnsembleMemberSet::new(
            vec![banded(2.0), banded(2.0), banded(2.0)],
            banded(2.0),
        )
        .unwrap();
        let scores =
            score_ensemble(&ensemble, &[0.5, 1.5], &[1, 3], AggregationMode::Same).unwrap();
        assert_eq!(scores.dfss.pair_count, 3);
        for (&m, &s) in scores.dfss.mean.iter().zip(&scores.dfss.std) {
            assert!((m - 1.0).abs() < 1e-12);
            assert!(s.abs() < 1e-12);
        }
    }

    #[test]
    fn test_pfss_and_emfss_are_distinct() {
        // One wet and one dry member: the 0.5-probability fraction field
        // and the thresholded mean field behave differently.
        let wet = banded(2.0);
        let dry = Grid::filled(0.0, 10, 10).unwrap();
        let ensemble = EnsembleMemberSet::new(vec![wet.clone(), dry], wet.clone()).unwrap();
        let scores = score_ensemble(&ensemble, &[1.5], &[3], AggregationMode::Same).unwrap();
        let p = scores.pfss.cell(0, 0).score;
        let e = scores.emfss.cell(0, 0).score;
        // Mean field is 1.0 in the band, below the 1.5 threshold: emFSS
        // sees an empty forecast mask while pFSS sees half fractions.
        assert!(p.is_finite());
        assert!((p - e).abs() > 1e-6 || e.is_nan());
    }

    #[test]
    fn test_crps_zero_for_perfect_single_member() {
        let obs = banded(2.0);
        let ensemble = EnsembleMemberSet::new(vec![obs.clone()], obs.clone()).unwrap();
        let scores = score_ensemble(&ensemble, &[0.5], &[3], AggregationMode::Same).unwrap();
        for &v in scores.crps.values() {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn test_crps_two_point_ensemble() {
        let lo = Grid::filled(0.0, 4, 4).unwrap();
        let hi = Grid::filled(2.0, 4, 4).unwrap();
        let obs = Grid::filled(1.0, 4, 4).unwrap();
        let ensemble = EnsembleMemberSet::new(vec![lo, hi], obs).unwrap();
        let crps = crps_field(&ensemble).unwrap();
        // term1 = 1, term2 = 0.5 * mean(|0-2| over off-diagonal pairs) = 0.5.
        for &v in crps.values() {
            assert!((v - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_member_shape_mismatch_is_fatal() {
        let a = Grid::filled(0.0, 4, 4).unwrap();
        let b = Grid::filled(0.0, 4, 5).unwrap();
        assert!(matches!(
            EnsembleMemberSet::new(vec![a.clone(), b], a),
            Err(VerifError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_pfss_bias_uses_mean_member_count() {
        let wet = banded(2.0);
        let dry = Grid::filled(0.0, 10, 10).unwrap();
        let ensemble =
            EnsembleMemberSet::new(vec![wet, dry.clone()], dry).unwrap();
        let scores = score_ensemble(&ensemble, &[0.5], &[1], AggregationMode::Same).unwrap();
        // Mean member exceedance is 25 cells of 100; the observation has 0.
        assert!((scores.pfss.cell(0, 0).bias_indicator - 0.25).abs() < 1e-12);
    }
}

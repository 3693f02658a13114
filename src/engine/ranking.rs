use crate::error::VerifError;
use crate::model::scores::{CondensedScore, RankMatrix, RankOverallScores, ScoreMatrix};

/// Relative-score sentinel for candidates below the no-skill value.
pub const BELOW_NO_SKILL_RELATIVE: f64 = -10.0;

/// Rank one cell's scores across competing forecasts.
///
/// 0 = missing, 1 = below the no-skill value, 2 = perfect (shared, no
/// competitive slot consumed), >= 3 = competition rank: exact ties share a
/// rank and the following ranks are skipped by the tie count, so each rank
/// reflects how many candidates were already placed.
pub fn rank_scores(scores: &[f64], no_skill: f64) -> Vec<u32> {
    let mut ranks = vec![0u32; scores.len()];
    let mut candidates: Vec<usize> = Vec::with_capacity(scores.len());
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            ranks[i] = 0;
        } else if s < no_skill {
            ranks[i] = 1;
        } else {
            candidates.push(i);
        }
    }
    // Stable descending sort keeps insertion order within exact ties.
    candidates.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut placed = 0u32;
    let mut prev_score = f64::NAN;
    let mut prev_rank = 0u32;
    for idx in candidates {
        let s = scores[idx];
        if s == 1.0 {
            ranks[idx] = 2;
            continue;
        }
        if placed > 0 && s == prev_score {
            ranks[idx] = prev_rank;
        } else {
            ranks[idx] = 3 + placed;
            prev_rank = ranks[idx];
            prev_score = s;
        }
        placed += 1;
    }
    ranks
}

/// Score minus the mean over this cell's candidates at or above the
/// no-skill value. NaN for missing scores, a fixed low sentinel below
/// no-skill.
pub fn relative_scores(scores: &[f64], no_skill: f64) -> Vec<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &s in scores {
        if !s.is_nan() && s >= no_skill {
            sum += s;
            n += 1;
        }
    }
    let mean = if n == 0 { f64::NAN } else { sum / n as f64 };
    scores
        .iter()
        .map(|&s| {
            if s.is_nan() {
                f64::NAN
            } else if s < no_skill {
                BELOW_NO_SKILL_RELATIVE
            } else {
                s - mean
            }
        })
        .collect()
}

/// Per-cell ranks and relative scores of every forecast in a comparison.
#[derive(Debug, Clone)]
pub struct CellRanking {
    pub ranks: Vec<RankMatrix>,
    /// Row-major relative-score cells per forecast.
    pub relative: Vec<Vec<f64>>,
}

pub fn rank_across_forecasts(
    matrices: &[&ScoreMatrix],
    no_skill: &[f64],
) -> Result<CellRanking, VerifError> {
    let Some(first) = matrices.first() else {
        return Ok(CellRanking {
            ranks: Vec::new(),
            relative: Vec::new(),
        });
    };
    for m in matrices {
        if !m.same_shape(first) {
            return Err(VerifError::ShapeMismatch(
                "competing score matrices differ in shape".to_string(),
            ));
        }
    }
    if no_skill.len() != first.n_thresholds() {
        return Err(VerifError::ShapeMismatch(format!(
            "{} no-skill values for {} threshold rows",
            no_skill.len(),
            first.n_thresholds()
        )));
    }
    let (rows, cols) = (first.n_thresholds(), first.n_windows());
    let mut rank_cells = vec![vec![0u32; rows * cols]; matrices.len()];
    let mut rel_cells = vec![vec![f64::NAN; rows * cols]; matrices.len()];
    let mut cell_scores = vec![0.0f64; matrices.len()];
    for row in 0..rows {
        for col in 0..cols {
            for (k, m) in matrices.iter().enumerate() {
                cell_scores[k] = m.cell(row, col).score;
            }
            let ranks = rank_scores(&cell_scores, no_skill[row]);
            let relative = relative_scores(&cell_scores, no_skill[row]);
            for k in 0..matrices.len() {
                rank_cells[k][row * cols + col] = ranks[k];
                rel_cells[k][row * cols + col] = relative[k];
            }
        }
    }
    Ok(CellRanking {
        ranks: rank_cells
            .into_iter()
            .map(|r| RankMatrix::new(rows, cols, r))
            .collect(),
        relative: rel_cells,
    })
}

/// Unweighted condensed score: each cell's score remapped linearly from
/// [no-skill, 1] onto [0, 1], clamped, and summed. A degenerate no-skill
/// of exactly 1 credits only exactly-perfect cells.
pub fn condensed_score(
    matrix: &ScoreMatrix,
    no_skill: &[f64],
) -> Result<CondensedScore, VerifError> {
    check_no_skill_len(matrix, no_skill)?;
    let cols = matrix.n_windows();
    let mut cells = vec![f64::NAN; matrix.n_thresholds() * cols];
    let mut value = 0.0;
    for row in 0..matrix.n_thresholds() {
        for col in 0..cols {
            let remapped = remap_cell(matrix.cell(row, col).score, no_skill[row]);
            cells[row * cols + col] = remapped;
            if !remapped.is_nan() {
                value += remapped;
            }
        }
    }
    Ok(CondensedScore { value, cells })
}

/// Weighted condensed score: the unweighted cell contributions scaled by a
/// threshold weight (larger toward the maximum bounded absolute threshold)
/// and a window weight (2x for the smallest window, 1x for the largest).
/// `bounded_max` is the largest bounded absolute threshold; percentile
/// rows keep their own threshold value in the weight but never enter the
/// normalizer.
pub fn condensed_score_weighted(
    matrix: &ScoreMatrix,
    no_skill: &[f64],
    bounded_max: f64,
) -> Result<CondensedScore, VerifError> {
    check_no_skill_len(matrix, no_skill)?;
    if !(bounded_max.is_finite() && bounded_max > 0.0) {
        return Err(VerifError::InvalidParameter(format!(
            "weighted condensed score needs a positive bounded threshold maximum, got {bounded_max}"
        )));
    }
    let cols = matrix.n_windows();
    let max_w = matrix.windows().iter().copied().max().unwrap_or(1) as f64;
    let mut cells = vec![f64::NAN; matrix.n_thresholds() * cols];
    let mut value = 0.0;
    for row in 0..matrix.n_thresholds() {
        let t_weight = (bounded_max + matrix.thresholds()[row]) / bounded_max;
        for col in 0..cols {
            let w_weight = 2.0 * max_w / (max_w + matrix.windows()[col] as f64);
            let remapped = remap_cell(matrix.cell(row, col).score, no_skill[row]);
            let weighted = t_weight * w_weight * remapped;
            cells[row * cols + col] = weighted;
            if !weighted.is_nan() {
                value += weighted;
            }
        }
    }
    Ok(CondensedScore { value, cells })
}

/// Rank-derived overall scores over the extended matrix: perfect ranks are
/// merged into the best competition rank, better ranks earn more score,
/// and the success rate counts cells not ranked below no-skill.
/// `n_bounded_abs` rows form the bounded absolute region; percentile rows
/// start at `n_absolute`.
pub fn overall_rank_scores(
    ranks: &RankMatrix,
    n_bounded_abs: usize,
    n_absolute: usize,
) -> RankOverallScores {
    let (abs_total, abs_success) = region_scores(ranks, 0, n_bounded_abs.min(ranks.n_thresholds()));
    let (pct_total, pct_success) =
        region_scores(ranks, n_absolute.min(ranks.n_thresholds()), ranks.n_thresholds());
    RankOverallScores {
        total_score_abs: abs_total,
        total_score_percentile: pct_total,
        success_rate_abs: abs_success,
        success_rate_percentile: pct_success,
    }
}

fn region_scores(ranks: &RankMatrix, row_start: usize, row_end: usize) -> (f64, f64) {
    let mut total = 0.0;
    let mut successes = 0usize;
    let mut n = 0usize;
    for row in row_start..row_end {
        for col in 0..ranks.n_windows() {
            let r = ranks.rank(row, col);
            let merged = if r == 2 { 3 } else { r };
            if merged >= 3 {
                total += 1.0 / (merged - 2) as f64;
            }
            if r != 1 {
                successes += 1;
            }
            n += 1;
        }
    }
    let success_rate = if n == 0 {
        f64::NAN
    } else {
        successes as f64 / n as f64
    };
    (total, success_rate)
}

fn remap_cell(score: f64, no_skill: f64) -> f64 {
    if no_skill == 1.0 {
        if score.is_nan() {
            f64::NAN
        } else if score == 1.0 {
            1.0
        } else {
            0.0
        }
    } else {
        let slope = 1.0 / (1.0 - no_skill);
        clamp01(slope * (score - 1.0) + 1.0)
    }
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

fn check_no_skill_len(matrix: &ScoreMatrix, no_skill: &[f64]) -> Result<(), VerifError> {
    if no_skill.len() != matrix.n_thresholds() {
        return Err(VerifError::ShapeMismatch(format!(
            "{} no-skill values for {} threshold rows",
            no_skill.len(),
            matrix.n_thresholds()
        )));
    }
    Ok(())
}

use crate::error::VerifError;
use crate::model::config::AggregationMode;
use crate::model::grid::{Grid, Mask};

/// Inclusive 2D prefix-sum table over a binary mask. Integer arithmetic
/// keeps window sums exact; fractions are formed only at lookup time.
#[derive(Debug, Clone)]
pub struct IntegralTable {
    table: Vec<i64>,
    ny: usize,
    nx: usize,
}

impl IntegralTable {
    pub fn new(mask: &Mask) -> Self {
        let (ny, nx) = (mask.ny(), mask.nx());
        let mut table = vec![0i64; ny * nx];
        for i in 0..ny {
            let mut row_sum = 0i64;
            for j in 0..nx {
                row_sum += mask.get(i, j) as i64;
                let above = if i > 0 { table[(i - 1) * nx + j] } else { 0 };
                table[i * nx + j] = row_sum + above;
            }
        }
        Self { table, ny, nx }
    }

    fn at(&self, i: usize, j: usize) -> i64 {
        self.table[i * self.nx + j]
    }

    /// Count of set cells in the border-clipped neighborhood of (i, j).
    fn window_count(&self, i: usize, j: usize, half: usize) -> i64 {
        let r0 = i.saturating_sub(half);
        let c0 = j.saturating_sub(half);
        let r1 = (i + half).min(self.ny - 1);
        let c1 = (j + half).min(self.nx - 1);
        let mut sum = self.at(r1, c1);
        if r0 > 0 {
            sum -= self.at(r0 - 1, c1);
        }
        if c0 > 0 {
            sum -= self.at(r1, c0 - 1);
        }
        if r0 > 0 && c0 > 0 {
            sum += self.at(r0 - 1, c0 - 1);
        }
        sum
    }

    /// Per-cell fraction of set cells in the centered `window`-sided
    /// neighborhood. Even window sizes use the next odd side, since a
    /// centered neighborhood has an odd side.
    pub fn fractions(&self, window: usize, mode: AggregationMode) -> Result<Grid, VerifError> {
        let half = half_width(window)?;
        let side = (2 * half + 1) as f64;
        let area = side * side;
        let mut out = Vec::with_capacity(self.ny * self.nx);
        for i in 0..self.ny {
            for j in 0..self.nx {
                if mode == AggregationMode::Strict && !fits(i, j, half, self.ny, self.nx) {
                    out.push(f64::NAN);
                } else {
                    out.push(self.window_count(i, j, half) as f64 / area);
                }
            }
        }
        Grid::from_vec(out, self.ny, self.nx)
    }
}

/// Summed-area-table windowed fractions (the fast path).
pub fn fraction_field(
    mask: &Mask,
    window: usize,
    mode: AggregationMode,
) -> Result<Grid, VerifError> {
    IntegralTable::new(mask).fractions(window, mode)
}

/// Direct uniform-kernel convolution, O(N * w^2). Interchangeable with
/// [`fraction_field`]; both paths produce identical integer counts.
pub fn fraction_field_direct(
    mask: &Mask,
    window: usize,
    mode: AggregationMode,
) -> Result<Grid, VerifError> {
    let half = half_width(window)?;
    let (ny, nx) = (mask.ny(), mask.nx());
    let side = (2 * half + 1) as f64;
    let area = side * side;
    let mut out = Vec::with_capacity(ny * nx);
    for i in 0..ny {
        for j in 0..nx {
            if mode == AggregationMode::Strict && !fits(i, j, half, ny, nx) {
                out.push(f64::NAN);
                continue;
            }
            let mut count = 0i64;
            for r in i.saturating_sub(half)..=(i + half).min(ny - 1) {
                for c in j.saturating_sub(half)..=(j + half).min(nx - 1) {
                    count += mask.get(r, c) as i64;
                }
            }
            out.push(count as f64 / area);
        }
    }
    Grid::from_vec(out, ny, nx)
}

/// Clamp a requested window to the grid extent, so oversized windows
/// degrade to whole-domain aggregation instead of wasted clipping.
pub fn clamp_window(window: usize, ny: usize, nx: usize) -> usize {
    window.min(ny.max(nx))
}

fn half_width(window: usize) -> Result<usize, VerifError> {
    if window == 0 {
        return Err(VerifError::InvalidParameter(
            "window size must be positive".to_string(),
        ));
    }
    Ok(window / 2)
}

fn fits(i: usize, j: usize, half: usize, ny: usize, nx: usize) -> bool {
    i >= half && j >= half && i + half < ny && j + half < nx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::grid::Grid;

    fn mask_from(values: Vec<f64>, ny: usize, nx: usize) -> Mask {
        Grid::from_vec(values, ny, nx).unwrap().mask_over(0.5)
    }

    // Deterministic pseudo-random 0/1 field, keyed by cell index.
    fn scrambled_mask(ny: usize, nx: usize) -> Mask {
        let values = (0..ny * nx)
            .map(|k| {
                let mut z = (k as u64).wrapping_add(0x9E3779B97F4A7C15);
                z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
                if z & 1 == 1 { 1.0 } else { 0.0 }
            })
            .collect();
        mask_from(values, ny, nx)
    }

    fn assert_paths_agree(mask: &Mask, window: usize, mode: AggregationMode) {
        let sat = fraction_field(mask, window, mode).unwrap();
        let direct = fraction_field_direct(mask, window, mode).unwrap();
        for (a, b) in sat.values().iter().zip(direct.values()) {
            if a.is_nan() {
                assert!(b.is_nan());
            } else {
                assert!((a - b).abs() < 1e-9, "sat {a} vs direct {b}");
            }
        }
    }

    #[test]
    fn test_sat_matches_direct_summation() {
        let fields = [
            mask_from(vec![0.0; 400], 20, 20),
            mask_from(vec![1.0; 400], 20, 20),
            {
                let mut v = vec![0.0; 400];
                v[7 * 20 + 13] = 1.0;
                mask_from(v, 20, 20)
            },
            scrambled_mask(20, 20),
        ];
        for mask in &fields {
            for window in [1, 3, 7, 19] {
                assert_paths_agree(mask, window, AggregationMode::Same);
                assert_paths_agree(mask, window, AggregationMode::Strict);
            }
        }
    }

    #[test]
    fn test_window_one_is_identity() {
        let mask = scrambled_mask(8, 9);
        let out = fraction_field(&mask, 1, AggregationMode::Same).unwrap();
        for i in 0..8 {
            for j in 0..9 {
                assert!((out.get(i, j) - mask.get(i, j) as f64).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_same_mode_clips_at_borders() {
        // Single hot corner: the clipped 3x3 neighborhood of (0,0) holds
        // 4 cells, one of them set, but the normalizer stays 9.
        let mut v = vec![0.0; 16];
        v[0] = 1.0;
        let mask = mask_from(v, 4, 4);
        let out = fraction_field(&mask, 3, AggregationMode::Same).unwrap();
        assert!((out.get(0, 0) - 1.0 / 9.0).abs() < 1e-12);
        assert!((out.get(1, 1) - 1.0 / 9.0).abs() < 1e-12);
        assert!(out.get(3, 3).abs() < 1e-12);
    }

    #[test]
    fn test_strict_mode_marks_border_band() {
        let mask = mask_from(vec![1.0; 25], 5, 5);
        let out = fraction_field(&mask, 3, AggregationMode::Strict).unwrap();
        assert!(out.get(0, 2).is_nan());
        assert!(out.get(2, 0).is_nan());
        assert!((out.get(2, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_strict_mode_all_nan_when_window_exceeds_extent() {
        let mask = mask_from(vec![1.0; 25], 5, 5);
        let out = fraction_field(&mask, 11, AggregationMode::Strict).unwrap();
        assert!(out.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let mask = mask_from(vec![1.0; 4], 2, 2);
        assert!(matches!(
            fraction_field(&mask, 0, AggregationMode::Same),
            Err(VerifError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_clamp_window() {
        assert_eq!(clamp_window(701, 100, 120), 120);
        assert_eq!(clamp_window(11, 100, 120), 11);
    }
}

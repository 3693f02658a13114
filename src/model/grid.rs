use serde::Serialize;

use crate::error::VerifError;

/// Read-only 2D field on the common verification grid, row-major (ny, nx).
/// Missing values are NaN; every reduction in this crate skips them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    data: Vec<f64>,
    ny: usize,
    nx: usize,
}

impl Grid {
    pub fn from_vec(data: Vec<f64>, ny: usize, nx: usize) -> Result<Self, VerifError> {
        if ny == 0 || nx == 0 {
            return Err(VerifError::InvalidParameter(format!(
                "grid dimensions must be positive, got {}x{}",
                ny, nx
            )));
        }
        if data.len() != ny * nx {
            return Err(VerifError::ShapeMismatch(format!(
                "grid data has {} values, expected {}x{} = {}",
                data.len(),
                ny,
                nx,
                ny * nx
            )));
        }
        Ok(Self { data, ny, nx })
    }

    pub fn filled(value: f64, ny: usize, nx: usize) -> Result<Self, VerifError> {
        Self::from_vec(vec![value; ny * nx], ny, nx)
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.nx + j]
    }

    pub fn same_shape(&self, other: &Grid) -> bool {
        self.ny == other.ny && self.nx == other.nx
    }

    pub fn nan_mean(&self) -> f64 {
        nan_mean(&self.data)
    }

    /// Maximum over finite cells; NaN if the grid holds no finite value.
    pub fn nan_max(&self) -> f64 {
        let mut max = f64::NEG_INFINITY;
        let mut seen = false;
        for &v in &self.data {
            if v.is_finite() && v > max {
                max = v;
                seen = true;
            }
        }
        if seen { max } else { f64::NAN }
    }

    /// q-th percentile (0..=100) over finite cells, linearly interpolated.
    /// NaN if the grid holds no finite value.
    pub fn percentile(&self, q: f64) -> f64 {
        percentile(&self.data, q)
    }

    /// Fraction of cells exceeding `threshold`, relative to the full cell
    /// count (missing cells never exceed). This is the base rate f0 behind
    /// the no-skill value 0.5 + 0.5*f0.
    pub fn exceedance_fraction(&self, threshold: f64) -> f64 {
        let hits = self.data.iter().filter(|&&v| v > threshold).count();
        hits as f64 / self.data.len() as f64
    }

    pub fn mask_over(&self, threshold: f64) -> Mask {
        self.mask_where(|v| v > threshold)
    }

    pub fn mask_under(&self, threshold: f64) -> Mask {
        self.mask_where(|v| v <= threshold)
    }

    pub fn mask_between(&self, lower: f64, upper: f64) -> Mask {
        self.mask_where(|v| v > lower && v <= upper)
    }

    fn mask_where<F: Fn(f64) -> bool>(&self, pred: F) -> Mask {
        // NaN compares false under every predicate used here, so missing
        // cells never enter a mask.
        let data = self
            .data
            .iter()
            .map(|&v| if pred(v) { 1u8 } else { 0u8 })
            .collect();
        Mask {
            data,
            ny: self.ny,
            nx: self.nx,
        }
    }
}

/// Binary exceedance field produced from a [`Grid`] and a threshold rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Vec<u8>,
    ny: usize,
    nx: usize,
}

impl Mask {
    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, i: usize, j: usize) -> u8 {
        self.data[i * self.nx + j]
    }

    pub fn count_set(&self) -> u64 {
        self.data.iter().map(|&v| v as u64).sum()
    }

    /// Cells set in `self` but not in `other` (one-sided difference).
    pub fn difference(&self, other: &Mask) -> Mask {
        debug_assert_eq!((self.ny, self.nx), (other.ny, other.nx));
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| a & !b)
            .collect();
        Mask {
            data,
            ny: self.ny,
            nx: self.nx,
        }
    }

    pub fn to_grid(&self) -> Grid {
        Grid {
            data: self.data.iter().map(|&v| v as f64).collect(),
            ny: self.ny,
            nx: self.nx,
        }
    }
}

pub fn nan_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Population standard deviation over non-NaN values.
pub fn nan_std(values: &[f64]) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            let d = v - mean;
            sum += d * d;
            n += 1;
        }
    }
    (sum / n as f64).sqrt()
}

pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q = q.clamp(0.0, 100.0);
    let pos = q / 100.0 * (finite.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        finite[lo]
    } else {
        finite[lo] + (finite[hi] - finite[lo]) * (pos - lo as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_rejects_bad_shape() {
        assert!(Grid::from_vec(vec![0.0; 6], 2, 3).is_ok());
        assert!(matches!(
            Grid::from_vec(vec![0.0; 5], 2, 3),
            Err(VerifError::ShapeMismatch(_))
        ));
        assert!(matches!(
            Grid::from_vec(vec![], 0, 3),
            Err(VerifError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_mask_over_ignores_nan() {
        let g = Grid::from_vec(vec![0.0, 2.0, f64::NAN, 5.0], 2, 2).unwrap();
        let m = g.mask_over(1.0);
        assert_eq!(m.values(), &[0, 1, 0, 1]);
        assert_eq!(m.count_set(), 2);
    }

    #[test]
    fn test_mask_difference() {
        let a = Grid::from_vec(vec![1.0, 1.0, 0.0, 0.0], 2, 2)
            .unwrap()
            .mask_over(0.5);
        let b = Grid::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2)
            .unwrap()
            .mask_over(0.5);
        assert_eq!(a.difference(&b).values(), &[1, 0, 0, 0]);
        assert_eq!(b.difference(&a).values(), &[0, 0, 1, 0]);
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&v, 100.0) - 4.0).abs() < 1e-12);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 25.0) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_skips_nan() {
        let v = [1.0, f64::NAN, 3.0];
        assert!((percentile(&v, 50.0) - 2.0).abs() < 1e-12);
        assert!(percentile(&[f64::NAN], 50.0).is_nan());
    }

    #[test]
    fn test_nan_mean_and_std() {
        let v = [1.0, f64::NAN, 3.0];
        assert!((nan_mean(&v) - 2.0).abs() < 1e-12);
        assert!((nan_std(&v) - 1.0).abs() < 1e-12);
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_exceedance_fraction_counts_full_domain() {
        let g = Grid::from_vec(vec![0.0, 2.0, f64::NAN, 5.0], 2, 2).unwrap();
        assert!((g.exceedance_fraction(1.0) - 0.5).abs() < 1e-12);
    }
}

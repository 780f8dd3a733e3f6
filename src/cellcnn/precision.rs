use super::matrix::Matrix;
use crate::{Error, Result};

/// Bits reported for an exact match.
const EXACT_BITS: f64 = 64.0;

/// Precision of a decrypted tensor against its plaintext shadow, in bits
/// of absolute error: `-log2 |expected - got|`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrecisionStats {
    pub min_bits: f64,
    pub mean_bits: f64,
    pub max_bits: f64,
    /// `-log2(||expected - got|| / ||expected||)`
    pub relative_bits: f64,
}

fn bits(error: f64) -> f64 {
    if error <= 0.0 {EXACT_BITS} else {(-error.log2()).min(EXACT_BITS)}
}

impl PrecisionStats {

    pub fn new(expected: &[f64], got: &[f64]) -> Self {
        assert_eq!(expected.len(), got.len(), "[Invalid argument] Length mismatch.");
        if expected.is_empty() {
            return Self { min_bits: EXACT_BITS, mean_bits: EXACT_BITS, max_bits: EXACT_BITS, relative_bits: EXACT_BITS };
        }
        let per_slot = expected.iter().zip(got).map(|(e, g)| bits((e - g).abs())).collect::<Vec<_>>();
        let min_bits = per_slot.iter().copied().fold(f64::INFINITY, f64::min);
        let max_bits = per_slot.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_bits = per_slot.iter().sum::<f64>() / per_slot.len() as f64;
        let diff = expected.iter().zip(got).map(|(e, g)| (e - g).powi(2)).sum::<f64>().sqrt();
        let norm = expected.iter().map(|e| e * e).sum::<f64>().sqrt();
        let relative_bits = if norm == 0.0 {bits(diff)} else {bits(diff / norm)};
        Self { min_bits, mean_bits, max_bits, relative_bits }
    }

    pub fn of_matrices(expected: &Matrix, got: &Matrix) -> Self {
        let e = expected.data().iter().map(|x| x.re).collect::<Vec<_>>();
        let g = got.data().iter().map(|x| x.re).collect::<Vec<_>>();
        Self::new(&e, &g)
    }

    /// Log the statistics; below `required` relative bits, fail when
    /// `strict` and warn otherwise.
    pub fn check(&self, name: &str, required: f64, strict: bool) -> Result<()> {
        log::info!(
            "[precision] {}: min {:.2}, mean {:.2}, max {:.2} bits, relative {:.2} bits",
            name, self.min_bits, self.mean_bits, self.max_bits, self.relative_bits
        );
        if self.relative_bits >= required {
            return Ok(());
        }
        if strict {
            return Err(Error::Precision { name: name.to_string(), bits: self.relative_bits, required });
        }
        log::warn!("[precision] {} has {:.2} bits, {} required", name, self.relative_bits, required);
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_stats() {
        let stats = PrecisionStats::new(&[1.0, 2.0, 4.0], &[1.0 + 2f64.powi(-10), 2.0 - 2f64.powi(-20), 4.0]);
        assert_abs_diff_eq!(stats.min_bits, 10.0);
        assert_abs_diff_eq!(stats.max_bits, 64.0);
        assert_abs_diff_eq!(stats.mean_bits, 94.0 / 3.0, epsilon = 1e-12);
        assert!(stats.relative_bits > 10.0);
    }

    #[test]
    fn test_check() {
        let stats = PrecisionStats::new(&[1.0], &[1.5]);
        assert_abs_diff_eq!(stats.relative_bits, 1.0);
        assert!(stats.check("W", 0.5, true).is_ok());
        assert!(stats.check("W", 20.0, false).is_ok());
        assert!(matches!(stats.check("W", 20.0, true), Err(Error::Precision { .. })));
        let exact = PrecisionStats::of_matrices(&Matrix::new(2, 2), &Matrix::new(2, 2));
        assert_eq!(exact.min_bits, 64.0);
    }
}

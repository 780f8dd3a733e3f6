//! Slot layouts of the inputs, weights, labels and masks.
//!
//! Every layout is first built as a slot vector so the plaintext side and
//! tests can reason about it, then encoded or encrypted at a given level.

use std::sync::Arc;

use num_complex::Complex;

use super::{
    matrix::Matrix,
    model::{EncryptedWeights, ModelParams, PlainWeights},
    plan::{NetworkShape, PackingPlan},
};
use crate::{CKKSEncoder, Ciphertext, Encryptor, HeContext, Plaintext};

fn zeros(slots: usize) -> Vec<Complex<f64>> {
    vec![Complex::new(0.0, 0.0); slots]
}

/// Diagonals of the left operand of [super::forward::Kernels::mul_matrix_left_pt].
///
/// For `i < inner / 2`, slot `j cols + k` holds
/// `alpha (L[j][(2i+j) mod inner] - i L[j][(2i+j+1) mod inner])`, the second
/// `i` being the imaginary unit. `inner` must be even.
pub fn left_diagonals(left: &Matrix, cols: usize, alpha: f64, slots: usize) -> Vec<Vec<Complex<f64>>> {
    let rows = left.rows();
    let inner = left.cols();
    assert!(inner % 2 == 0, "[Invalid argument] Inner dimension must be even.");
    assert!(rows * cols <= slots, "[Invalid argument] Left operand does not fit.");
    (0..inner / 2).map(|i| {
        let mut values = zeros(slots);
        for j in 0..rows {
            let even = left.re(j, (2 * i + j) % inner);
            let odd = left.re(j, (2 * i + j + 1) % inner);
            let value = Complex::new(alpha * even, -alpha * odd);
            for k in 0..cols {
                values[j * cols + k] = value;
            }
        }
        values
    }).collect()
}

/// `copies` copies of a row-major matrix: slot `t` holds
/// `M[(t / cols) mod rows][t mod cols]`.
pub fn tiled(matrix: &Matrix, copies: usize, slots: usize) -> Vec<Complex<f64>> {
    let rows = matrix.rows();
    let cols = matrix.cols();
    let len = copies * rows * cols;
    assert!(len <= slots, "[Invalid argument] Tiled matrix does not fit.");
    let mut values = zeros(slots);
    for (t, v) in values.iter_mut().take(len).enumerate() {
        *v = matrix.get((t / cols) % rows, t % cols);
    }
    values
}

/// Dense weights `W` (`H x K`): slot `c B H + j H + k` holds `W[k][c]`.
pub fn dense_weights_slots(weights: &Matrix, batch: usize, slots: usize) -> Vec<Complex<f64>> {
    let h = weights.rows();
    let k = weights.cols();
    assert!(batch * h * k <= slots, "[Invalid argument] Dense weights do not fit.");
    let mut values = zeros(slots);
    for c in 0..k {
        for j in 0..batch {
            for f in 0..h {
                values[c * batch * h + j * h + f] = weights.get(f, c);
            }
        }
    }
    values
}

/// Inverse of [tiled] for the first copy: `rows x cols`.
pub fn untiled(slots: &[Complex<f64>], rows: usize, cols: usize) -> Matrix {
    let values = slots[..rows * cols].iter().map(|x| x.re).collect::<Vec<_>>();
    Matrix::from_real(rows, cols, &values)
}

/// Inverse of [dense_weights_slots] for the first sample: `H x K`.
pub fn dense_weights_from_slots(slots: &[Complex<f64>], shape: &NetworkShape) -> Matrix {
    let mut w = Matrix::new(shape.filters, shape.classes);
    for c in 0..shape.classes {
        for k in 0..shape.filters {
            w.set(k, c, Complex::new(slots[c * shape.batch_filters() + k].re, 0.0));
        }
    }
    w
}

/// Plain weights, or gradients, from the decoded slots of their ciphertexts.
pub fn weights_from_slots(conv: &[Complex<f64>], dense: &[Complex<f64>], shape: &NetworkShape) -> PlainWeights {
    ModelParams {
        conv: untiled(conv, shape.features, shape.filters),
        dense: dense_weights_from_slots(dense, shape),
    }
}

/// Labels `Y` (`B x K`) aligned with the refreshed pre-activations: slot
/// `(j K + c) H + k` holds `Y[j][c]`, and class `c` owns the block of `CMS`
/// slots at `B D + c CMS` whose slot `t` holds `Y[(t/H) mod B][c]`.
pub fn label_slots(labels: &Matrix, plan: &PackingPlan) -> Vec<Complex<f64>> {
    let s = plan.shape();
    let (b, k, h) = (s.batch, s.classes, s.filters);
    assert!(labels.rows() == b && labels.cols() == k, "[Invalid argument] Label matrix has the wrong shape.");
    let mut values = zeros(plan.slots());
    for j in 0..b {
        for c in 0..k {
            for f in 0..h {
                values[(j * k + c) * h + f] = labels.get(j, c);
            }
        }
    }
    let blocks = plan.region("U per class").start;
    let cms = s.conv_mat_size();
    for c in 0..k {
        for t in 0..cms {
            values[blocks + c * cms + t] = labels.get((t / h) % b, c);
        }
    }
    values
}

/// `value` on `[start, start + len)`, zero elsewhere.
pub fn mask_slots(start: usize, len: usize, value: f64, slots: usize) -> Vec<Complex<f64>> {
    assert!(start + len <= slots, "[Invalid argument] Mask does not fit.");
    let mut values = zeros(slots);
    values[start..start + len].iter_mut().for_each(|x| *x = Complex::new(value, 0.0));
    values
}

/// Encodes and encrypts the CellCNN operands of one plan.
///
/// Plaintext multiplicands are encoded at the prime the next rescale
/// removes, so products come back to the ciphertext scale exactly.
pub struct Packer {
    context: Arc<HeContext>,
    encoder: CKKSEncoder,
    plan: PackingPlan,
    scale: f64,
}

impl Packer {

    pub fn new(context: Arc<HeContext>, plan: PackingPlan, scale: f64) -> Self {
        let encoder = CKKSEncoder::new(context.clone());
        Self { context, encoder, plan, scale }
    }

    pub fn plan(&self) -> &PackingPlan {&self.plan}
    pub fn encoder(&self) -> &CKKSEncoder {&self.encoder}
    pub fn context(&self) -> &Arc<HeContext> {&self.context}

    /// Scale of fresh ciphertexts.
    pub fn scale(&self) -> f64 {self.scale}

    fn encode_multiplicand(&self, values: &[Complex<f64>], level: usize) -> Plaintext {
        self.encoder.encode_c64_array_new(values, level, self.context.rescale_modulus(level))
    }

    /// Left operand `L` of a plaintext by ciphertext product whose result
    /// has `cols` columns.
    pub fn encode_left_for_pt_mul(&self, left: &Matrix, cols: usize, alpha: f64, level: usize) -> Vec<Plaintext> {
        left_diagonals(left, cols, alpha, self.plan.slots()).iter()
            .map(|values| self.encode_multiplicand(values, level))
            .collect()
    }

    /// Conv weights `C`, one copy per sample of the batch.
    pub fn encrypt_right_for_pt_mul(&self, encryptor: &Encryptor, conv: &Matrix, level: usize) -> Ciphertext {
        let values = tiled(conv, self.plan.shape().batch, self.plan.slots());
        encryptor.encrypt_new(&self.encoder.encode_c64_array_new(&values, level, self.scale))
    }

    /// Dense weights `W`, transposed and repeated per sample.
    pub fn encrypt_right_for_naive_mul(&self, encryptor: &Encryptor, dense: &Matrix, level: usize) -> Ciphertext {
        let values = dense_weights_slots(dense, self.plan.shape().batch, self.plan.slots());
        encryptor.encrypt_new(&self.encoder.encode_c64_array_new(&values, level, self.scale))
    }

    /// Both weight matrices at their plan levels. Gradients share the layout.
    pub fn encrypt_weights(&self, encryptor: &Encryptor, weights: &PlainWeights) -> EncryptedWeights {
        let levels = self.plan.levels();
        ModelParams {
            conv: self.encrypt_right_for_pt_mul(encryptor, &weights.conv, levels.conv_weights),
            dense: self.encrypt_right_for_naive_mul(encryptor, &weights.dense, levels.dense_weights),
        }
    }

    /// Labels at the level and scale of the activated tensor they are
    /// subtracted from.
    pub fn encode_labels_for_backward_with_prepooling(&self, labels: &Matrix, level: usize, scale: f64) -> Plaintext {
        self.encoder.encode_c64_array_new(&label_slots(labels, &self.plan), level, scale)
    }

    /// Constant mask multiplicand.
    pub fn encode_mask(&self, start: usize, len: usize, value: f64, level: usize) -> Plaintext {
        self.encode_multiplicand(&mask_slots(start, len, value, self.plan.slots()), level)
    }

    /// Several constant blocks in one multiplicand.
    pub fn encode_masks(&self, blocks: &[(usize, usize)], value: f64, level: usize) -> Plaintext {
        let mut values = zeros(self.plan.slots());
        for &(start, len) in blocks {
            values[start..start + len].iter_mut().for_each(|x| *x = Complex::new(value, 0.0));
        }
        self.encode_multiplicand(&values, level)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellcnn::plan::NetworkShape;
    use crate::{EncryptionParameters, SecurityLevel};
    use approx::assert_abs_diff_eq;

    fn plan() -> (Arc<HeContext>, PackingPlan) {
        let context = HeContext::new(EncryptionParameters::ckks(10, 10, 40, 60, 61), SecurityLevel::None).unwrap();
        let shape = NetworkShape { batch: 4, cells: 8, features: 4, filters: 2, classes: 2 };
        let plan = PackingPlan::new(shape, &context).unwrap();
        (context, plan)
    }

    #[test]
    fn test_left_diagonals() {
        let left = Matrix::from_real(2, 4, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let d = left_diagonals(&left, 3, 0.5, 16);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0][0], Complex::new(0.5, -1.0));
        assert_eq!(d[0][2], Complex::new(0.5, -1.0));
        assert_eq!(d[0][3], Complex::new(3.0, -3.5));
        assert_eq!(d[1][0], Complex::new(1.5, -2.0));
        assert_eq!(d[1][3], Complex::new(4.0, -2.5));
        assert_eq!(d[1][6], Complex::new(0.0, 0.0));
    }

    #[test]
    fn test_weight_layouts() {
        let (_, plan) = plan();
        let conv = Matrix::from_real(4, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let t = tiled(&conv, 4, plan.slots());
        assert_eq!(t[2].re, 3.0);
        assert_eq!(t[9].re, 2.0);
        assert_eq!(t[31].re, 8.0);
        assert_eq!(t[32].re, 0.0);

        let dense = Matrix::from_real(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let w = dense_weights_slots(&dense, 4, plan.slots());
        assert_eq!(w[0].re, 1.0);
        assert_eq!(w[1].re, 3.0);
        assert_eq!(w[6].re, 1.0);
        assert_eq!(w[8].re, 2.0);
        assert_eq!(w[15].re, 4.0);
        assert_eq!(w[16].re, 0.0);

        let shape = *plan.shape();
        let back = weights_from_slots(&t, &w, &shape);
        assert_eq!(back.conv, conv);
        assert_eq!(back.dense, dense);
    }

    #[test]
    fn test_label_layout() {
        let (_, plan) = plan();
        let labels = Matrix::from_real(4, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let y = label_slots(&labels, &plan);
        assert_eq!(y[0].re, 1.0);
        assert_eq!(y[2].re, 0.0);
        assert_eq!(y[4 + 2].re, 1.0);
        assert_eq!(y[16 + 2].re, 0.0);
        assert_eq!(y[16 + 32 + 2].re, 1.0);
        assert_eq!(y[16 + 8].re, 1.0);
        assert_eq!(y[80].re, 0.0);
    }

    #[test]
    fn test_encoded_values() {
        let (context, plan) = plan();
        let packer = Packer::new(context.clone(), plan, 2f64.powi(40));
        let mask = packer.encode_mask(3, 5, 0.25, 6);
        assert_eq!(mask.scale(), context.rescale_modulus(6));
        let decoded = packer.encoder().decode_new(&mask);
        assert_abs_diff_eq!(decoded[2].re, 0.0, epsilon = 1e-7);
        assert_abs_diff_eq!(decoded[3].re, 0.25, epsilon = 1e-7);
        assert_abs_diff_eq!(decoded[7].re, 0.25, epsilon = 1e-7);
        assert_abs_diff_eq!(decoded[8].re, 0.0, epsilon = 1e-7);

        let both = packer.encoder().decode_new(&packer.encode_masks(&[(0, 1), (10, 2)], 2.0, 4));
        assert_abs_diff_eq!(both[0].re, 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(both[11].re, 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(both[12].re, 0.0, epsilon = 1e-7);
    }
}

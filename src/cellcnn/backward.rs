use super::{forward::Kernels, matrix::Matrix, model::EncryptedGradients};
use crate::{Ciphertext, Error, Plaintext, Result};

impl Kernels {

    /// Diagonals of the pre-pooled batch `X` (`B x F`) for [Kernels::forward].
    pub fn encode_input(&self, batch: &Matrix) -> Vec<Plaintext> {
        let filters = self.plan().shape().filters;
        self.packer().encode_left_for_pt_mul(batch, filters, 1.0, self.plan().levels().input)
    }

    /// The cubic `sigma(x) = c0 + c1 x + c3 x^3` and its derivative, two
    /// levels below `x`.
    pub fn activation(&self, x: &Ciphertext) -> Result<(Ciphertext, Ciphertext)> {
        if x.level() < 2 {
            return Err(Error::LevelExhausted { op: "activation", level: x.level(), needed: 2 });
        }
        let evaluator = self.evaluator();
        let (c0, c1, c3) = self.cubic();
        let squared = self.multiply_relin_rescale(x, x);
        let mut c3x = evaluator.multiply_const_new(x, c3);
        evaluator.rescale_to_next_inplace(&mut c3x);
        let mut sigma = self.multiply_relin_rescale(&squared, &c3x);
        let mut c1x = evaluator.multiply_const_new(x, c1);
        evaluator.rescale_to_next_inplace(&mut c1x);
        evaluator.drop_to_level_inplace(&mut c1x, sigma.level());
        evaluator.add_inplace(&mut sigma, &c1x);
        evaluator.add_const_inplace(&mut sigma, c0);

        let mut derivative = evaluator.multiply_const_new(&squared, 3.0 * c3);
        evaluator.rescale_to_next_inplace(&mut derivative);
        evaluator.add_const_inplace(&mut derivative, c1);
        Ok((sigma, derivative))
    }

    /// Dense gradient from `prod`, which holds `P[j][k] E1[j][c]` at
    /// `j D + c H + k`. Lands in the layout of the dense weights.
    fn dense_gradient(&self, prod: &Ciphertext) -> Result<Ciphertext> {
        let evaluator = self.evaluator();
        let galois_keys = &self.keys().galois_keys;
        let shape = *self.plan().shape();
        let (b, h) = (shape.batch, shape.filters);
        let level = prod.level();
        let summed = evaluator.inner_sum_log(prod, shape.dense_mat_size() as isize, b, galois_keys);

        let factor = self.gradient_factor();
        let mut gradient: Option<Ciphertext> = None;
        for c in 0..shape.classes {
            let mask = self.packer().encode_mask(c * h, h, factor, level);
            let part = self.rotate(&evaluator.multiply_plain_new(&summed, &mask), -((c * (b - 1) * h) as isize));
            match gradient.as_mut() {
                None => gradient = Some(part),
                Some(g) => evaluator.add_inplace(g, &part),
            }
        }
        let mut gradient = gradient.ok_or_else(|| Error::UnsupportedShape("no classes".into()))?;
        evaluator.rescale_to_next_inplace(&mut gradient);
        let gradient = evaluator.replicate_log(&gradient, h as isize, b, galois_keys);
        self.at_level("dense gradient", &gradient, self.plan().levels().dense_weights)
    }

    /// Conv gradient `X^T E0` from `prod`, whose class blocks hold
    /// `E1[(t/H) mod B][c] W[t mod H][c]`. Lands in the layout of the conv
    /// weights.
    fn conv_gradient(&self, prod: &Ciphertext, batch: &Matrix) -> Result<Ciphertext> {
        let evaluator = self.evaluator();
        let galois_keys = &self.keys().galois_keys;
        let shape = *self.plan().shape();
        let (b, h, f) = (shape.batch, shape.filters, shape.features);
        let cms = shape.conv_mat_size();

        let shifted = self.rotate(prod, shape.batch_dense() as isize);
        let e0 = evaluator.inner_sum_log(&shifted, cms as isize, shape.classes, galois_keys);
        let diagonals = self.packer().encode_left_for_pt_mul(&batch.transpose(), h, 1.0, e0.level());
        let mut gradient = self.mul_matrix_left_pt(&diagonals, &e0, h)?;
        let conjugated = evaluator.complex_conjugate_new(&gradient, galois_keys);
        evaluator.add_inplace(&mut gradient, &conjugated);

        let mask = self.packer().encode_mask(0, f * h, 0.5 * self.gradient_factor(), gradient.level());
        let gradient = self.multiply_plain_rescale(&gradient, &mask);
        let gradient = evaluator.replicate_log(&gradient, (f * h) as isize, b, galois_keys);
        self.at_level("conv gradient", &gradient, self.plan().levels().conv_weights)
    }

    /// `mu prev` block of the refreshed tensor, moved to slot 0 and masked,
    /// at `level`.
    fn momentum_term(&self, refreshed: &Ciphertext, region: &str, level: usize) -> Result<Ciphertext> {
        let region = self.plan().region(region);
        let source = self.at_level("momentum", refreshed, level + 1)?;
        let moved = self.rotate(&source, region.start as isize);
        let mask = self.packer().encode_mask(0, region.len, 1.0, level + 1);
        Ok(self.multiply_plain_rescale(&moved, &mask))
    }

    /**
    Backward pass from the refreshed tensor.

    `labels` is the one-hot `B x K` label matrix and `batch` the pre-pooled
    `B x F` inputs of the same mini-batch. Returns the momentum-adjusted
    local gradients, already multiplied by `eta / (B P)`, at the weight
    levels.
    */
    pub fn backward(&self, refreshed: &Ciphertext, labels: &Matrix, batch: &Matrix) -> Result<EncryptedGradients> {
        let evaluator = self.evaluator();
        let shape = *self.plan().shape();
        let levels = *self.plan().levels();
        if refreshed.level() < levels.refreshed {
            return Err(Error::LevelExhausted { op: "backward", level: refreshed.level(), needed: levels.refreshed });
        }

        let (sigma, derivative) = self.activation(refreshed)?;
        let labels = self.packer().encode_labels_for_backward_with_prepooling(labels, sigma.level(), sigma.scale());
        let error = self.multiply_relin_rescale(&evaluator.sub_plain_new(&sigma, &labels), &derivative);
        log::debug!("[backward] error term at level {}, scale 2^{:.2}", error.level(), error.scale().log2());

        let p_start = self.plan().region("P").start;
        let source = self.at_level("backward", refreshed, error.level())?;
        let prod = self.multiply_relin_rescale(&self.rotate(&source, p_start as isize), &error);

        let mut dense = self.dense_gradient(&prod)?;
        let mut conv = self.conv_gradient(&prod, batch)?;
        evaluator.add_inplace(&mut dense, &self.momentum_term(refreshed, "mu prevDW", levels.dense_weights)?);
        evaluator.add_inplace(&mut conv, &self.momentum_term(refreshed, "mu prevDC", levels.conv_weights)?);
        log::debug!(
            "[backward] {:?}: gradients at levels {} and {}",
            (shape.batch, shape.features, shape.filters, shape.classes), conv.level(), dense.level()
        );
        Ok(EncryptedGradients { conv, dense })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellcnn::fixture::Fixture;
    use crate::cellcnn::{
        model::PlainWeights,
        packing::{dense_weights_slots, tiled},
        transform::CellCnnTransform,
    };
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_forward_layout() {
        let f = Fixture::new(1);
        let (batch, _) = f.batch(0);
        let weights = f.initial_weights();
        let encrypted = f.encrypt_weights(&weights);
        let previous = f.zero_gradients();
        let packed = f.kernels.forward(&f.kernels.encode_input(&batch), &encrypted, &previous).unwrap();
        assert_eq!(packed.level(), 1);

        let network = f.network();
        let pooled = network.pooled(&batch, &weights);
        let u = network.pre_activations(&batch, &weights);
        let y = f.decrypt(&packed);
        let s = f.shape;
        for j in 0..s.batch {
            for c in 0..s.classes {
                assert_abs_diff_eq!(y[c * s.batch_filters() + j * s.filters].re, u.re(j, c), epsilon = 1e-5);
            }
            for k in 0..s.filters {
                assert_abs_diff_eq!(y[s.batch_dense() + j * s.filters + k].re, pooled.re(j, k), epsilon = 1e-5);
            }
        }
        let w = dense_weights_slots(&weights.dense, s.batch, f.plan.slots());
        for i in 0..s.batch_dense() {
            assert_abs_diff_eq!(y[2 * s.batch_dense() + i].re, w[i].re, epsilon = 1e-5);
            assert_abs_diff_eq!(y[3 * s.batch_dense() + i].re, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_gradients_match_plain_network() {
        let f = Fixture::new(1);
        let (batch, labels) = f.batch(0);
        let weights = f.initial_weights();
        let encrypted = f.encrypt_weights(&weights);
        let network = f.network();
        let s = f.shape;

        // previous gradients from one plain step, encrypted in weight layout
        let previous_plain = network.gradients(&batch, &labels, &weights, &PlainWeights::zeros(&s)).unwrap();
        let previous = f.encrypt_gradients(&previous_plain);

        let packed = f.kernels.forward(&f.kernels.encode_input(&batch), &encrypted, &previous).unwrap();
        let transform = CellCnnTransform::new(f.plan.clone(), f.momentum);
        let refreshed = f.refresh(&packed, &transform);
        assert_eq!(refreshed.level(), 10);
        let gradients = f.kernels.backward(&refreshed, &labels, &batch).unwrap();
        assert_eq!(gradients.dense.level(), 2);
        assert_eq!(gradients.conv.level(), 3);

        let expected = network.gradients(&batch, &labels, &weights, &previous_plain).unwrap();
        let dense = f.decrypt(&gradients.dense);
        let conv = f.decrypt(&gradients.conv);
        let expected_dense = dense_weights_slots(&expected.dense, s.batch, f.plan.slots());
        let expected_conv = tiled(&expected.conv, s.batch, f.plan.slots());
        for i in 0..f.plan.slots() {
            assert_abs_diff_eq!(dense[i].re, expected_dense[i].re, epsilon = 1e-5);
            assert_abs_diff_eq!(conv[i].re, expected_conv[i].re, epsilon = 1e-5);
        }
        assert!(expected.dense.frobenius_norm() > 1e-3);
    }

    #[test]
    fn test_rotation_keys_are_exactly_used() {
        let f = Fixture::new(1);
        let (batch, labels) = f.batch(1);
        let weights = f.encrypt_weights(&f.initial_weights());
        let previous = f.zero_gradients();
        f.kernels.evaluator().enable_galois_trace();
        let packed = f.kernels.forward(&f.kernels.encode_input(&batch), &weights, &previous).unwrap();
        let refreshed = f.refresh(&packed, &CellCnnTransform::new(f.plan.clone(), f.momentum));
        f.kernels.backward(&refreshed, &labels, &batch).unwrap();
        assert_eq!(f.kernels.evaluator().galois_trace(), f.plan.galois_elts().to_vec());
    }

    #[test]
    fn test_backward_rejects_tired_input() {
        let f = Fixture::new(1);
        let (batch, labels) = f.batch(0);
        let packed = f.kernels.forward(
            &f.kernels.encode_input(&batch), &f.encrypt_weights(&f.initial_weights()), &f.zero_gradients()
        ).unwrap();
        assert!(matches!(
            f.kernels.backward(&packed, &labels, &batch),
            Err(Error::LevelExhausted { op: "backward", level: 1, needed: 10 })
        ));
    }
}

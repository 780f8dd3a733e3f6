use std::sync::Arc;

use super::{
    activation::CompiledActivation,
    model::{EncryptedGradients, EncryptedWeights},
    packing::Packer,
    plan::PackingPlan,
};
use crate::{Ciphertext, Error, Evaluator, GaloisKeys, HeContext, Plaintext, RelinKeys, Result};

/// Evaluation keys of the party set, shared read-only by every kernel.
pub struct EvaluationKeys {
    pub relin_keys: RelinKeys,
    pub galois_keys: GaloisKeys,
}

/// Encrypted CellCNN kernels of one party.
///
/// The forward kernel ends at the refresh level of the plan; the backward
/// kernel starts from the refreshed tensor. Both are straight sequences of
/// evaluator calls.
pub struct Kernels {
    evaluator: Evaluator,
    packer: Packer,
    keys: Arc<EvaluationKeys>,
    cubic: (f64, f64, f64),
    learning_rate: f64,
    party_count: usize,
}

impl Kernels {

    /// Fails unless the activation is a cubic approximation.
    pub fn new(
        context: Arc<HeContext>, plan: PackingPlan, scale: f64, keys: Arc<EvaluationKeys>,
        activation: &CompiledActivation, learning_rate: f64, party_count: usize,
    ) -> Result<Self> {
        let cubic = activation.cubic()?;
        if party_count == 0 {
            return Err(Error::Config("party count must be positive".into()));
        }
        Ok(Self {
            evaluator: Evaluator::new(context.clone()),
            packer: Packer::new(context, plan, scale),
            keys,
            cubic,
            learning_rate,
            party_count,
        })
    }

    pub fn evaluator(&self) -> &Evaluator {&self.evaluator}
    pub fn packer(&self) -> &Packer {&self.packer}
    pub fn plan(&self) -> &PackingPlan {self.packer.plan()}
    pub(crate) fn cubic(&self) -> (f64, f64, f64) {self.cubic}
    pub(crate) fn keys(&self) -> &EvaluationKeys {&self.keys}

    /// `eta / (B P)`, folded into the gradient masks.
    pub(crate) fn gradient_factor(&self) -> f64 {
        self.learning_rate / (self.plan().shape().batch * self.party_count) as f64
    }

    pub(crate) fn at_level(&self, op: &'static str, cipher: &Ciphertext, level: usize) -> Result<Ciphertext> {
        if cipher.level() < level {
            return Err(Error::LevelExhausted { op, level: cipher.level(), needed: level });
        }
        Ok(self.evaluator.drop_to_level_new(cipher, level))
    }

    pub(crate) fn rotate(&self, cipher: &Ciphertext, steps: isize) -> Ciphertext {
        self.evaluator.rotate_new(cipher, steps, &self.keys.galois_keys)
    }

    pub(crate) fn multiply_relin_rescale(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        let mut product = self.evaluator.multiply_new(a, b);
        self.evaluator.relinearize_inplace(&mut product, &self.keys.relin_keys);
        self.evaluator.rescale_to_next_inplace(&mut product);
        product
    }

    pub(crate) fn multiply_plain_rescale(&self, a: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut product = self.evaluator.multiply_plain_new(a, plain);
        self.evaluator.rescale_to_next_inplace(&mut product);
        product
    }

    /**
    Plaintext by ciphertext matrix product from the diagonals of the left
    operand (see [super::packing::left_diagonals]).

    `x` holds the right operand row-major with `cols` columns, repeated far
    enough that every diagonal reads inside it. Two inner indices are
    consumed per rotation: `tmp = x + rot(i x, cols)` carries row `r` in the
    real and row `r + 1` in the imaginary part, and the conjugated diagonal
    brings both back into the real part. The real part of the result is the
    product; the imaginary part is garbage. Costs one level.
    */
    pub fn mul_matrix_left_pt(&self, diagonals: &[Plaintext], x: &Ciphertext, cols: usize) -> Result<Ciphertext> {
        if x.level() == 0 {
            return Err(Error::LevelExhausted { op: "mul_matrix_left_pt", level: 0, needed: 1 });
        }
        let evaluator = &self.evaluator;
        let galois_keys = &self.keys.galois_keys;
        let mut tmp = evaluator.rotate_new(&evaluator.multiply_by_i_new(x), cols as isize, galois_keys);
        evaluator.add_inplace(&mut tmp, x);
        let steps = (0..diagonals.len()).map(|i| (2 * cols * i) as isize).collect::<Vec<_>>();
        let rotated = evaluator.rotate_hoisted(&tmp, &steps, galois_keys);
        let mut terms = rotated.iter().zip(diagonals.iter())
            .map(|(c, p)| evaluator.multiply_plain_new(c, p));
        let mut sum = terms.next()
            .ok_or_else(|| Error::UnsupportedShape("product with an empty inner dimension".into()))?;
        terms.for_each(|t| evaluator.add_inplace(&mut sum, &t));
        evaluator.rescale_to_next_inplace(&mut sum);
        Ok(sum)
    }

    /// `P = L C`, the pooled conv outputs at `j H + k`.
    pub fn conv(&self, input: &[Plaintext], conv: &Ciphertext) -> Result<Ciphertext> {
        let levels = self.plan().levels();
        let conv = self.at_level("conv", conv, levels.conv_weights)?;
        self.mul_matrix_left_pt(input, &conv, self.plan().shape().filters)
    }

    /// Replicate `P` once per class, multiply by the dense weights and sum
    /// over the filters: `U[j][c]` lands at `c B H + j H`.
    ///
    /// Returns the replicated `P` alongside `U`.
    pub fn dense(&self, pooled: &Ciphertext, dense: &Ciphertext) -> Result<(Ciphertext, Ciphertext)> {
        let shape = *self.plan().shape();
        let levels = self.plan().levels();
        let galois_keys = &self.keys.galois_keys;
        let pooled = self.at_level("dense", pooled, levels.dense_weights)?;
        let dense = self.at_level("dense", dense, levels.dense_weights)?;
        let replicated = self.evaluator.replicate_log(&pooled, shape.batch_filters() as isize, shape.classes, galois_keys);
        let product = self.multiply_relin_rescale(&replicated, &dense);
        let u = self.evaluator.inner_sum_log(&product, 1, shape.filters, galois_keys);
        Ok((replicated, u))
    }

    /**
    Forward pass of one mini-batch, up to the refresh point.

    `input` holds the diagonals of the pre-pooled batch. The result packs
    `U`, the replicated `P`, the dense weights and both previous gradients
    at multiples of `B D`, at the refresh level.
    */
    pub fn forward(&self, input: &[Plaintext], weights: &EncryptedWeights, previous: &EncryptedGradients) -> Result<Ciphertext> {
        let bd = self.plan().shape().batch_dense() as isize;
        let level = self.plan().refresh_level();
        let pooled = self.conv(input, &weights.conv)?;
        let (replicated, mut packed) = self.dense(&pooled, &weights.dense)?;
        if packed.level() != level {
            return Err(Error::LevelExhausted { op: "forward", level: packed.level(), needed: level });
        }
        let parts = [
            (&replicated, -bd),
            (&weights.dense, -2 * bd),
            (&previous.dense, -3 * bd),
            (&previous.conv, -4 * bd),
        ];
        for (part, steps) in parts {
            let part = self.at_level("forward", part, level)?;
            self.evaluator.add_inplace(&mut packed, &self.rotate(&part, steps));
        }
        log::debug!("[forward] packed at level {}, scale 2^{:.2}", packed.level(), packed.scale().log2());
        Ok(packed)
    }

    /// Pre-activations of a batch for prediction: the real part of slot
    /// `c B H + j H` is `U[j][c]`.
    pub fn pre_activations(&self, input: &[Plaintext], weights: &EncryptedWeights) -> Result<Ciphertext> {
        let pooled = self.conv(input, &weights.conv)?;
        Ok(self.dense(&pooled, &weights.dense)?.1)
    }

}

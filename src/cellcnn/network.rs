use super::{
    activation::CompiledActivation,
    matrix::{Matrix, MatrixOps},
    model::{ModelParams, PlainGradients, PlainWeights},
    plan::NetworkShape,
};
use crate::Result;

/// The plaintext CellCNN, computing exactly what the encrypted kernels
/// compute: a test oracle and the plaintext-only training path.
#[derive(Clone, Debug)]
pub struct PlainNetwork {
    shape: NetworkShape,
    activation: CompiledActivation,
    learning_rate: f64,
    momentum: f64,
    party_count: usize,
}

impl PlainNetwork {

    pub fn new(shape: NetworkShape, activation: CompiledActivation, learning_rate: f64, momentum: f64, party_count: usize) -> Self {
        Self { shape, activation, learning_rate, momentum, party_count: party_count.max(1) }
    }

    pub fn shape(&self) -> &NetworkShape {&self.shape}
    pub fn momentum(&self) -> f64 {self.momentum}
    pub fn activation(&self) -> &CompiledActivation {&self.activation}

    /// `P = X C` for a pre-pooled batch `X`.
    pub fn pooled(&self, batch: &Matrix, weights: &PlainWeights) -> Matrix {
        batch.mul_mat(&weights.conv)
    }

    /// `U = X C W`.
    pub fn pre_activations(&self, batch: &Matrix, weights: &PlainWeights) -> Matrix {
        self.pooled(batch, weights).mul_mat(&weights.dense)
    }

    /// Class scores `sigma(U)`.
    pub fn predict(&self, batch: &Matrix, weights: &PlainWeights) -> Matrix {
        self.pre_activations(batch, weights).map_real(|x| self.activation.eval(x))
    }

    /// Local gradients of one party, scaled by `eta / (B P)` and with the
    /// momentum term `mu prev` added.
    pub fn gradients(&self, batch: &Matrix, labels: &Matrix, weights: &PlainWeights, previous: &PlainGradients) -> Result<PlainGradients> {
        let factor = self.learning_rate / (batch.rows() * self.party_count) as f64;
        let pooled = self.pooled(batch, weights);
        let u = pooled.mul_mat(&weights.dense);
        let scores = u.map_real(|x| self.activation.eval(x));
        let derivative = u.map_real(|x| self.activation.derivative(x));
        let error = scores.sub(&(), labels)?.hadamard(&derivative);

        let dense = pooled.transpose().mul_mat(&error).mult_const(&(), factor)?;
        let back = error.mul_mat(&weights.dense.transpose());
        let conv = batch.transpose().mul_mat(&back).mult_const(&(), factor)?;
        ModelParams { conv, dense }.with_momentum(&(), previous, self.momentum)
    }

    /// Mean squared error of the scores against one-hot labels.
    #[cfg(test)]
    pub fn loss(&self, batch: &Matrix, labels: &Matrix, weights: &PlainWeights) -> Result<f64> {
        let diff = self.predict(batch, weights).sub(&(), labels)?;
        Ok(diff.frobenius_norm().powi(2) / batch.rows() as f64)
    }

}

use std::sync::Arc;

use num_complex::Complex;

use super::{
    activation::CompiledActivation,
    forward::Kernels,
    matrix::Matrix,
    model::EncryptedWeights,
    plan::NetworkShape,
};
use crate::{
    multiparty::{DecryptionProtocol, Participant},
    CKKSEncoder, Ciphertext, Error, HeContext, Result,
};

/// Fraction of rows whose highest score is not the labelled class.
pub fn error_rate(scores: &Matrix, labels: &Matrix) -> f64 {
    if scores.rows() == 0 {
        return 0.0;
    }
    let wrong = scores.argmax_rows().iter().zip(labels.argmax_rows())
        .filter(|(a, b)| **a != *b)
        .count();
    wrong as f64 / scores.rows() as f64
}

/// Decrypt with the shares of every party, in party order.
pub fn decrypt_jointly(context: &Arc<HeContext>, cipher: &Ciphertext, participants: &[&Participant]) -> Result<Vec<Complex<f64>>> {
    let mut protocol = DecryptionProtocol::new(context.clone(), cipher.clone(), participants.len());
    for p in participants {
        let share = protocol.share(p);
        protocol.receive(p.participant_id, share)?;
    }
    Ok(CKKSEncoder::new(context.clone()).decode_new(&protocol.finish()?))
}

/// `U` (`B x K`) from the decoded slots of [Kernels::pre_activations].
pub fn pre_activations_from_slots(shape: &NetworkShape, slots: &[Complex<f64>]) -> Matrix {
    let mut u = Matrix::new(shape.batch, shape.classes);
    for j in 0..shape.batch {
        for c in 0..shape.classes {
            u.set(j, c, Complex::new(slots[c * shape.batch_filters() + j * shape.filters].re, 0.0));
        }
    }
    u
}

/// Stateless prediction with encrypted weights. Rows are processed one
/// batch at a time; the last batch is padded with zero rows.
pub struct Predictor<'a> {
    kernels: &'a Kernels,
    activation: &'a CompiledActivation,
}

impl<'a> Predictor<'a> {

    pub fn new(kernels: &'a Kernels, activation: &'a CompiledActivation) -> Self {
        Self { kernels, activation }
    }

    /// Class scores `sigma(U)` of every row of `inputs` (`N x F`).
    pub fn scores(&self, inputs: &Matrix, weights: &EncryptedWeights, participants: &[&Participant]) -> Result<Matrix> {
        let shape = *self.kernels.plan().shape();
        if inputs.cols() != shape.features {
            return Err(Error::UnsupportedShape(format!("{} input features, network has {}", inputs.cols(), shape.features)));
        }
        let context = self.kernels.evaluator().context().clone();
        let mut scores = Matrix::new(inputs.rows(), shape.classes);
        for start in (0..inputs.rows()).step_by(shape.batch) {
            let end = (start + shape.batch).min(inputs.rows());
            let mut batch = Matrix::new(shape.batch, shape.features);
            for i in start..end {
                batch.set_row(i - start, inputs.row(i));
            }
            let cipher = self.kernels.pre_activations(&self.kernels.encode_input(&batch), weights)?;
            let u = pre_activations_from_slots(&shape, &decrypt_jointly(&context, &cipher, participants)?);
            for i in start..end {
                for c in 0..shape.classes {
                    scores.set(i, c, Complex::new(self.activation.eval(u.re(i - start, c)), 0.0));
                }
            }
        }
        Ok(scores)
    }

}

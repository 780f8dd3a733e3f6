use std::io::{Read, Write};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::matrix::{apply_update, sum_in_order, with_momentum, Matrix, MatrixOps};
use super::plan::NetworkShape;
use crate::{
    serialize::{Serializable, SerializableWithHeContext},
    Ciphertext, HeContext, Result,
};

/// Conv and dense parts of the model, or of a gradient of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams<M> {
    /// `F x H`
    pub conv: M,
    /// `H x K`
    pub dense: M,
}

pub type PlainWeights = ModelParams<Matrix>;
pub type PlainGradients = ModelParams<Matrix>;
pub type EncryptedWeights = ModelParams<Ciphertext>;
pub type EncryptedGradients = ModelParams<Ciphertext>;

impl PlainWeights {

    /// Uniform in `(-1, 1) / sqrt(fan-in)`.
    pub fn init<R: Rng>(shape: &NetworkShape, rng: &mut R) -> Self {
        Self {
            conv: Matrix::weights_init(shape.features, shape.filters, shape.features, rng),
            dense: Matrix::weights_init(shape.filters, shape.classes, shape.filters, rng),
        }
    }

    pub fn zeros(shape: &NetworkShape) -> Self {
        Self { conv: Matrix::new(shape.features, shape.filters), dense: Matrix::new(shape.filters, shape.classes) }
    }

}

impl<M: MatrixOps + Clone> ModelParams<M> {

    /// Part-wise sum in index order.
    pub fn sum_in_order(backend: &M::Backend, items: &[ModelParams<M>]) -> Result<Self> {
        let conv = items.iter().map(|x| x.conv.clone()).collect::<Vec<_>>();
        let dense = items.iter().map(|x| x.dense.clone()).collect::<Vec<_>>();
        Ok(Self { conv: sum_in_order(backend, &conv)?, dense: sum_in_order(backend, &dense)? })
    }

    pub fn with_momentum(&self, backend: &M::Backend, previous: &Self, momentum: f64) -> Result<Self> {
        Ok(Self {
            conv: with_momentum(backend, &self.conv, &previous.conv, momentum)?,
            dense: with_momentum(backend, &self.dense, &previous.dense, momentum)?,
        })
    }

    /// `self - gradient`.
    pub fn apply_update(&self, backend: &M::Backend, gradient: &Self) -> Result<Self> {
        Ok(Self {
            conv: apply_update(backend, &self.conv, &gradient.conv)?,
            dense: apply_update(backend, &self.dense, &gradient.dense)?,
        })
    }

}

impl SerializableWithHeContext for ModelParams<Ciphertext> {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> std::io::Result<usize> {
        Ok(self.conv.serialize(context, stream)? + self.dense.serialize(context, stream)?)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> std::io::Result<Self> {
        let conv = Ciphertext::deserialize(context, stream)?;
        let dense = Ciphertext::deserialize(context, stream)?;
        Ok(Self { conv, dense })
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        self.conv.serialized_size(context) + self.dense.serialized_size(context)
    }

}

impl Serializable for ModelParams<Matrix> {

    fn serialize<T: Write>(&self, stream: &mut T) -> std::io::Result<usize> {
        Ok(Serializable::serialize(&self.conv, stream)? + Serializable::serialize(&self.dense, stream)?)
    }

    fn deserialize<T: Read>(stream: &mut T) -> std::io::Result<Self> {
        let conv = <Matrix as Serializable>::deserialize(stream)?;
        let dense = <Matrix as Serializable>::deserialize(stream)?;
        Ok(Self { conv, dense })
    }

    fn serialized_size(&self) -> usize {
        self.conv.serialized_size() + self.dense.serialized_size()
    }

}

/// Previous gradient of one party, with a staged value that only replaces
/// it once the iteration commits.
#[derive(Clone, Debug)]
pub struct MomentumState<M> {
    committed: ModelParams<M>,
    staged: Option<ModelParams<M>>,
}

impl<M: Clone> MomentumState<M> {

    pub fn new(initial: ModelParams<M>) -> Self {
        Self { committed: initial, staged: None }
    }

    pub fn previous(&self) -> &ModelParams<M> {&self.committed}

    pub fn stage(&mut self, gradient: ModelParams<M>) {
        self.staged = Some(gradient);
    }

    pub fn has_staged(&self) -> bool {self.staged.is_some()}

    pub fn commit(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.committed = staged;
        }
    }

    pub fn rollback(&mut self) {
        self.staged = None;
    }

}

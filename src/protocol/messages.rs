use crate::{
    cellcnn::{Matrix, ModelParams},
    serialize::{CiphertextHeader, Serializable, SerializableWithHeContext},
    Ciphertext, Error, HeContext, Result,
};

/// One serialized tensor with its wire header. Ciphertexts carry their
/// level, `log2` scale and ring degree; plaintext matrices have degree 0.
#[derive(Clone, Debug, PartialEq)]
pub struct WireTensor {
    pub level: usize,
    pub scale_pow2: u8,
    pub degree: usize,
    pub bytes: Vec<u8>,
}

impl WireTensor {

    pub fn from_ciphertext(context: &HeContext, cipher: &Ciphertext) -> Result<Self> {
        let header = CiphertextHeader::of(cipher);
        let mut bytes = Vec::with_capacity(cipher.serialized_size(context));
        cipher.serialize(context, &mut bytes)?;
        Ok(Self { level: header.level, scale_pow2: header.scale_pow2, degree: header.degree, bytes })
    }

    pub fn from_matrix(matrix: &Matrix) -> Result<Self> {
        let mut bytes = Vec::with_capacity(matrix.serialized_size());
        Serializable::serialize(matrix, &mut bytes)?;
        Ok(Self { level: 0, scale_pow2: 0, degree: 0, bytes })
    }

    /// Decode and check the result against the header it travelled with.
    pub fn to_ciphertext(&self, context: &HeContext) -> Result<Ciphertext> {
        let cipher = Ciphertext::deserialize(context, &mut self.bytes.as_slice())?;
        let header = CiphertextHeader::of(&cipher);
        if (header.level, header.scale_pow2, header.degree) != (self.level, self.scale_pow2, self.degree) {
            return Err(Error::ShareMismatch(format!(
                "ciphertext announced as (level {}, scale 2^{}, degree {}) decodes to (level {}, scale 2^{}, degree {})",
                self.level, self.scale_pow2, self.degree, header.level, header.scale_pow2, header.degree
            )));
        }
        Ok(cipher)
    }

    pub fn to_matrix(&self) -> Result<Matrix> {
        if self.degree != 0 {
            return Err(Error::Protocol(format!("expected a plaintext matrix, got a degree {} ciphertext", self.degree)));
        }
        Ok(<Matrix as Serializable>::deserialize(&mut self.bytes.as_slice())?)
    }

}

/// Conv and dense parts as they travel: `[conv, dense]`.
pub fn model_to_wire<F, M>(model: &ModelParams<M>, encode: F) -> Result<Vec<WireTensor>>
where
    F: Fn(&M) -> Result<WireTensor>,
{
    Ok(vec![encode(&model.conv)?, encode(&model.dense)?])
}

pub fn model_from_wire<F, M>(wire: &[WireTensor], decode: F) -> Result<ModelParams<M>>
where
    F: Fn(&WireTensor) -> Result<M>,
{
    match wire {
        [conv, dense] => Ok(ModelParams { conv: decode(conv)?, dense: decode(dense)? }),
        _ => Err(Error::Protocol(format!("a model travels as 2 tensors, got {}", wire.len()))),
    }
}

/// Everything exchanged over a parent-child link of the tree.
#[derive(Debug)]
pub enum Message {
    /// Root to children: the global weights of an iteration, and the
    /// plaintext shadow when one runs.
    NewEncryptedIteration {
        iteration: usize,
        weights: Vec<WireTensor>,
        ct_sizes: Vec<usize>,
        shadow: Option<Vec<WireTensor>>,
    },
    /// Child to parent: the forward outputs of the sender's subtree, by party.
    LocalPacks { iteration: usize, packs: Vec<(usize, WireTensor)> },
    /// Root to children: every party's forward output, to be refreshed.
    RefreshRound { iteration: usize, packs: Vec<WireTensor> },
    /// Child to parent: refresh shares of the sender's subtree, summed, one
    /// per forward output.
    RefreshShares { iteration: usize, shares: Vec<Vec<u8>> },
    /// Root to children: the refreshed outputs, by party.
    Refreshed { iteration: usize, packs: Vec<WireTensor> },
    /// Child to parent: the subtree's summed gradients.
    ChildUpdatedLocalWeights {
        iteration: usize,
        gradients: Vec<WireTensor>,
        shadow: Option<Vec<WireTensor>>,
    },
    /// Root to children: the update of `iteration` is applied.
    Commit { iteration: usize },
    /// Root to children: forget everything staged in `iteration`.
    Abort { iteration: usize },
    /// Child to parent: the sender's subtree cannot finish `iteration`.
    Failed { iteration: usize, cause: Error },
    Terminate,
}

impl Message {

    pub fn name(&self) -> &'static str {
        match self {
            Message::NewEncryptedIteration { .. } => "NewEncryptedIteration",
            Message::LocalPacks { .. } => "LocalPacks",
            Message::RefreshRound { .. } => "RefreshRound",
            Message::RefreshShares { .. } => "RefreshShares",
            Message::Refreshed { .. } => "Refreshed",
            Message::ChildUpdatedLocalWeights { .. } => "ChildUpdatedLocalWeights",
            Message::Commit { .. } => "Commit",
            Message::Abort { .. } => "Abort",
            Message::Failed { .. } => "Failed",
            Message::Terminate => "Terminate",
        }
    }

    pub fn iteration(&self) -> Option<usize> {
        match self {
            Message::NewEncryptedIteration { iteration, .. }
            | Message::LocalPacks { iteration, .. }
            | Message::RefreshRound { iteration, .. }
            | Message::RefreshShares { iteration, .. }
            | Message::Refreshed { iteration, .. }
            | Message::ChildUpdatedLocalWeights { iteration, .. }
            | Message::Commit { iteration }
            | Message::Abort { iteration }
            | Message::Failed { iteration, .. } => Some(*iteration),
            Message::Terminate => None,
        }
    }

    /// Error for a message that is not the one the protocol waits for.
    pub fn unexpected(&self, iteration: usize, expected: &str) -> Error {
        Error::Protocol(format!(
            "expected {} of iteration {}, got {} of {:?}",
            expected, iteration, self.name(), self.iteration()
        ))
    }

}

use std::sync::Arc;

use super::messages::{model_from_wire, model_to_wire, WireTensor};
use crate::{
    cellcnn::{
        packing, predict, CellCnnTransform, CompiledActivation, EvaluationKeys, Kernels, Matrix,
        MatrixOps, ModelParams, PackingPlan, PlainNetwork, PlainWeights, Predictor,
    },
    multiparty::{Participant, RefreshProtocol, RefreshShare},
    util::PRNGSeed,
    Ciphertext, Encryptor, Error, HeContext, PublicKey, Result,
};

/// The local computations of one party. The tree protocol around them is
/// the same for every engine.
pub trait Engine: Send + Sized + 'static {
    type Tensor: MatrixOps + Clone + Send + 'static;

    fn backend(&self) -> &<Self::Tensor as MatrixOps>::Backend;

    fn encode(&self, model: &ModelParams<Self::Tensor>) -> Result<Vec<WireTensor>>;

    fn decode(&self, wire: &[WireTensor]) -> Result<ModelParams<Self::Tensor>>;

    /// Plaintext weights (or gradients) in the engine's representation.
    fn lift(&self, plain: &PlainWeights) -> ModelParams<Self::Tensor>;

    /// The tensor to refresh before the backward pass, if any.
    fn forward(
        &self, batch: &Matrix, weights: &ModelParams<Self::Tensor>, previous: &ModelParams<Self::Tensor>,
    ) -> Result<Option<Ciphertext>>;

    fn refresher(&self) -> Option<&Refresher>;

    /// Local gradients, scaled and with the momentum term.
    fn gradients(
        &self, refreshed: Option<&Ciphertext>, batch: &Matrix, labels: &Matrix,
        weights: &ModelParams<Self::Tensor>, previous: &ModelParams<Self::Tensor>,
    ) -> Result<ModelParams<Self::Tensor>>;

    /// The plaintext value, when the engine holds it in the clear.
    fn as_plain(model: &ModelParams<Self::Tensor>) -> Option<PlainWeights>;

    /// Plaintext weights, decrypted with the cooperation of every party.
    fn reveal(engines: &[Self], model: &ModelParams<Self::Tensor>) -> Result<PlainWeights>;

    /// Class scores of `inputs` (`N x F`).
    fn scores(engines: &[Self], inputs: &Matrix, model: &ModelParams<Self::Tensor>) -> Result<Matrix>;
}

/// Plaintext-only training.
pub struct PlainEngine {
    network: PlainNetwork,
}

impl PlainEngine {
    pub fn new(network: PlainNetwork) -> Self {
        Self { network }
    }
}

impl Engine for PlainEngine {
    type Tensor = Matrix;

    fn backend(&self) -> &() {&()}

    fn encode(&self, model: &PlainWeights) -> Result<Vec<WireTensor>> {
        model_to_wire(model, WireTensor::from_matrix)
    }

    fn decode(&self, wire: &[WireTensor]) -> Result<PlainWeights> {
        model_from_wire(wire, WireTensor::to_matrix)
    }

    fn lift(&self, plain: &PlainWeights) -> PlainWeights {
        plain.clone()
    }

    fn forward(&self, _: &Matrix, _: &PlainWeights, _: &PlainWeights) -> Result<Option<Ciphertext>> {
        Ok(None)
    }

    fn refresher(&self) -> Option<&Refresher> {None}

    fn gradients(
        &self, _: Option<&Ciphertext>, batch: &Matrix, labels: &Matrix, weights: &PlainWeights, previous: &PlainWeights,
    ) -> Result<PlainWeights> {
        self.network.gradients(batch, labels, weights, previous)
    }

    fn as_plain(model: &PlainWeights) -> Option<PlainWeights> {
        Some(model.clone())
    }

    fn reveal(_: &[Self], model: &PlainWeights) -> Result<PlainWeights> {
        Ok(model.clone())
    }

    fn scores(engines: &[Self], inputs: &Matrix, model: &PlainWeights) -> Result<Matrix> {
        let engine = engines.first().ok_or_else(|| Error::Protocol("no parties".into()))?;
        Ok(engine.network.predict(inputs, model))
    }
}

/// A party's side of the collective refresh.
pub struct Refresher {
    participant: Participant,
    common_seed: PRNGSeed,
    scale: f64,
    mask_bound_bits: u32,
    transform: CellCnnTransform,
}

impl Refresher {

    pub fn context(&self) -> &Arc<HeContext> {self.participant.context()}

    /// Round of the `index`-th refreshed tensor of `iteration`.
    pub fn protocol(&self, iteration: usize, index: usize) -> RefreshProtocol {
        RefreshProtocol::new(self.context().clone(), &self.common_seed, iteration, index, self.scale, self.mask_bound_bits)
    }

    pub fn share(&self, protocol: &RefreshProtocol, cipher: &Ciphertext) -> RefreshShare {
        protocol.share(&self.participant, cipher, &self.transform)
    }

    pub fn finish(&self, protocol: &RefreshProtocol, cipher: &Ciphertext, aggregate: &RefreshShare) -> Result<Ciphertext> {
        protocol.finish(cipher, aggregate, &self.transform)
    }

}

/// Settings shared by the encrypted engines of a run.
pub struct EncryptedSettings {
    pub plan: PackingPlan,
    pub scale: f64,
    pub learning_rate: f64,
    pub momentum: f64,
    pub party_count: usize,
    pub mask_bound_bits: u32,
    pub common_seed: PRNGSeed,
}

/// Training on packed ciphertexts with a collective refresh per iteration.
pub struct EncryptedEngine {
    kernels: Kernels,
    encryptor: Encryptor,
    refresher: Refresher,
    activation: CompiledActivation,
}

impl EncryptedEngine {

    pub fn new(
        participant: Participant, public_key: PublicKey, keys: Arc<EvaluationKeys>,
        activation: &CompiledActivation, settings: &EncryptedSettings,
    ) -> Result<Self> {
        let context = participant.context().clone();
        let kernels = Kernels::new(
            context.clone(), settings.plan.clone(), settings.scale, keys, activation,
            settings.learning_rate, settings.party_count,
        )?;
        let refresher = Refresher {
            participant,
            common_seed: settings.common_seed,
            scale: settings.scale,
            mask_bound_bits: settings.mask_bound_bits,
            transform: CellCnnTransform::new(settings.plan.clone(), settings.momentum),
        };
        Ok(Self {
            kernels,
            encryptor: Encryptor::new(context).set_public_key(public_key),
            refresher,
            activation: activation.clone(),
        })
    }

    pub fn kernels(&self) -> &Kernels {&self.kernels}

    fn context(&self) -> &Arc<HeContext> {self.refresher.context()}

    fn participants(engines: &[Self]) -> Vec<&Participant> {
        engines.iter().map(|e| &e.refresher.participant).collect()
    }

}

impl Engine for EncryptedEngine {
    type Tensor = Ciphertext;

    fn backend(&self) -> &crate::Evaluator {self.kernels.evaluator()}

    fn encode(&self, model: &ModelParams<Ciphertext>) -> Result<Vec<WireTensor>> {
        model_to_wire(model, |c| WireTensor::from_ciphertext(self.context(), c))
    }

    /// Also checks that each part sits at its planned level.
    fn decode(&self, wire: &[WireTensor]) -> Result<ModelParams<Ciphertext>> {
        let model = model_from_wire(wire, |w| w.to_ciphertext(self.context()))?;
        let levels = self.kernels.plan().levels();
        if model.conv.level() != levels.conv_weights || model.dense.level() != levels.dense_weights {
            return Err(Error::ShareMismatch(format!(
                "model parts at levels ({}, {}), planned ({}, {})",
                model.conv.level(), model.dense.level(), levels.conv_weights, levels.dense_weights
            )));
        }
        Ok(model)
    }

    fn lift(&self, plain: &PlainWeights) -> ModelParams<Ciphertext> {
        self.kernels.packer().encrypt_weights(&self.encryptor, plain)
    }

    fn forward(
        &self, batch: &Matrix, weights: &ModelParams<Ciphertext>, previous: &ModelParams<Ciphertext>,
    ) -> Result<Option<Ciphertext>> {
        let input = self.kernels.encode_input(batch);
        self.kernels.forward(&input, weights, previous).map(Some)
    }

    fn refresher(&self) -> Option<&Refresher> {Some(&self.refresher)}

    fn gradients(
        &self, refreshed: Option<&Ciphertext>, batch: &Matrix, labels: &Matrix,
        _: &ModelParams<Ciphertext>, _: &ModelParams<Ciphertext>,
    ) -> Result<ModelParams<Ciphertext>> {
        let refreshed = refreshed.ok_or_else(|| Error::Protocol("backward pass without a refreshed tensor".into()))?;
        self.kernels.backward(refreshed, labels, batch)
    }

    fn as_plain(_: &ModelParams<Ciphertext>) -> Option<PlainWeights> {None}

    fn reveal(engines: &[Self], model: &ModelParams<Ciphertext>) -> Result<PlainWeights> {
        let engine = engines.first().ok_or_else(|| Error::Protocol("no parties".into()))?;
        let participants = Self::participants(engines);
        let conv = predict::decrypt_jointly(engine.context(), &model.conv, &participants)?;
        let dense = predict::decrypt_jointly(engine.context(), &model.dense, &participants)?;
        Ok(packing::weights_from_slots(&conv, &dense, engine.kernels.plan().shape()))
    }

    fn scores(engines: &[Self], inputs: &Matrix, model: &ModelParams<Ciphertext>) -> Result<Matrix> {
        let engine = engines.first().ok_or_else(|| Error::Protocol("no parties".into()))?;
        Predictor::new(&engine.kernels, &engine.activation).scores(inputs, model, &Self::participants(engines))
    }
}

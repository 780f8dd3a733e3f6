//! CellCNN: one convolutional filter bank over pre-pooled cells followed by
//! a dense classifier, trained on packed CKKS ciphertexts.
//!
//! Arnaud et al., 2017. Sensitive detection of rare disease-associated cell
//! subsets via representation learning. <https://doi.org/10.1038/ncomms14825>

pub mod activation;
pub mod backward;
pub mod data;
pub mod forward;
pub mod matrix;
pub mod model;
pub mod network;
pub mod packing;
pub mod plan;
pub mod precision;
pub mod predict;
pub mod transform;

pub use activation::{Activation, CompiledActivation};
pub use data::{BatchSampler, Dataset};
pub use forward::{EvaluationKeys, Kernels};
pub use matrix::{Matrix, MatrixOps};
pub use model::{EncryptedGradients, EncryptedWeights, ModelParams, MomentumState, PlainGradients, PlainWeights};
pub use network::PlainNetwork;
pub use packing::Packer;
pub use plan::{NetworkShape, PackingPlan};
pub use precision::PrecisionStats;
pub use predict::Predictor;
pub use transform::CellCnnTransform;

#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::Arc;

    use num_complex::Complex;
    use rand::SeedableRng;

    use super::*;
    use crate::multiparty::{CollectiveKeys, Participant, RefreshProtocol, RefreshShare, SlotTransform};
    use crate::util::PRNGSeed;
    use crate::{Ciphertext, EncryptionParameters, Encryptor, HeContext, SecurityLevel};

    pub const SCALE: f64 = 1099511627776.0;

    /// The reduced encrypted shape on a `2^10` ring with collective keys.
    pub struct Fixture {
        pub context: Arc<HeContext>,
        pub shape: NetworkShape,
        pub plan: PackingPlan,
        pub participants: Vec<Participant>,
        pub encryptor: Encryptor,
        pub kernels: Kernels,
        pub data: Dataset,
        pub momentum: f64,
        seed: PRNGSeed,
    }

    impl Fixture {

        pub fn new(parties: usize) -> Self {
            let context = HeContext::new(EncryptionParameters::ckks(10, 10, 40, 60, 61), SecurityLevel::None).unwrap();
            let shape = NetworkShape { batch: 4, cells: 8, features: 4, filters: 2, classes: 2 };
            let plan = PackingPlan::new(shape, &context).unwrap();
            let seed = PRNGSeed::from_u64(11);
            let participants = (0..parties)
                .map(|i| Participant::new(context.clone(), seed, parties, i))
                .collect::<Vec<_>>();
            let keys = CollectiveKeys::generate(context.clone(), &participants, plan.galois_elts()).unwrap();
            let encryptor = Encryptor::new(context.clone()).set_public_key(keys.public_key);
            let evaluation_keys = Arc::new(EvaluationKeys { relin_keys: keys.relin_keys, galois_keys: keys.galois_keys });
            let activation = Activation::default().compile().unwrap();
            let kernels = Kernels::new(context.clone(), plan.clone(), SCALE, evaluation_keys, &activation, 0.5, parties).unwrap();
            let data = Dataset::synthetic(32, shape.cells, shape.features, shape.classes, &seed).unwrap();
            Self { context, shape, plan, participants, encryptor, kernels, data, momentum: 0.9, seed }
        }

        pub fn network(&self) -> PlainNetwork {
            PlainNetwork::new(self.shape, Activation::default().compile().unwrap(), 0.5, self.momentum, self.participants.len())
        }

        pub fn batch(&self, index: usize) -> (Matrix, Matrix) {
            let b = self.shape.batch;
            self.data.batch(&(index * b..(index + 1) * b).collect::<Vec<_>>())
        }

        pub fn initial_weights(&self) -> PlainWeights {
            PlainWeights::init(&self.shape, &mut rand_chacha::ChaCha8Rng::seed_from_u64(7))
        }

        pub fn encrypt_weights(&self, weights: &PlainWeights) -> EncryptedWeights {
            self.kernels.packer().encrypt_weights(&self.encryptor, weights)
        }

        pub fn encrypt_gradients(&self, gradients: &PlainGradients) -> EncryptedGradients {
            self.encrypt_weights(gradients)
        }

        pub fn zero_gradients(&self) -> EncryptedGradients {
            self.encrypt_weights(&PlainWeights::zeros(&self.shape))
        }

        pub fn decrypt(&self, cipher: &Ciphertext) -> Vec<Complex<f64>> {
            let participants = self.participants.iter().collect::<Vec<_>>();
            predict::decrypt_jointly(&self.context, cipher, &participants).unwrap()
        }

        pub fn refresh(&self, cipher: &Ciphertext, transform: &dyn SlotTransform) -> Ciphertext {
            let protocol = RefreshProtocol::new(self.context.clone(), &self.seed, 0, 0, SCALE, 12);
            let mut aggregate: Option<RefreshShare> = None;
            for p in &self.participants {
                let share = protocol.share(p, cipher, transform);
                match aggregate.as_mut() {
                    None => aggregate = Some(share),
                    Some(sum) => protocol.aggregate(sum, &share, cipher, p.participant_id).unwrap(),
                }
            }
            protocol.finish(cipher, &aggregate.unwrap(), transform).unwrap()
        }

    }
}

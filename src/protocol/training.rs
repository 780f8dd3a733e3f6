use std::sync::Arc;
use std::time::Duration;

use super::{
    engine::{EncryptedEngine, EncryptedSettings, Engine, PlainEngine},
    party::{Party, PartyReport, PartySettings, RootOutcome},
    tree::{connect, BinaryTree},
};
use crate::{
    cellcnn::{
        predict::error_rate, BatchSampler, Dataset, EvaluationKeys, PackingPlan, PlainNetwork, PlainWeights,
        PrecisionStats,
    },
    config::Config,
    multiparty::{CollectiveKeys, Participant},
    util::{BlakeRNG, PRNGSeed},
    Error, HeContext, Result,
};

/// Outcome of a training run.
#[derive(Debug)]
pub struct TrainingReport {
    pub iterations: usize,
    pub completed: usize,
    /// Final weights, decrypted jointly in encrypted runs.
    pub weights: PlainWeights,
    /// Plaintext shadow trained on the same batches, when asked for.
    pub shadow: Option<PlainWeights>,
    pub gradient_log: Vec<Vec<u8>>,
    /// Misclassified fraction of the validation set, or of the training
    /// set when there is no validation set.
    pub validation_error: f64,
    pub parties: Vec<PartyReport>,
    /// The iteration that stopped the run, if any.
    pub aborted: Option<Error>,
}

impl TrainingReport {

    /// Compare the weights against the shadow, conv (`C`) and dense (`W`).
    pub fn check_precision(&self, required: f64, strict: bool) -> Result<()> {
        let shadow = match &self.shadow {
            Some(shadow) => shadow,
            None => return Ok(()),
        };
        PrecisionStats::of_matrices(&shadow.conv, &self.weights.conv).check("C", required, strict)?;
        PrecisionStats::of_matrices(&shadow.dense, &self.weights.dense).check("W", required, strict)
    }

}

/**
Train on `train` with `config.training.hosts` simulated parties, one thread
each, linked in a binary tree rooted at party 0.

Shapes are checked against the ring before any context or key exists, so
an oversized network fails fast. With `shadow`, every party also trains
the plaintext network on the same batches.
*/
pub fn train(config: &Config, train: &Dataset, validation: &Dataset, shadow: bool) -> Result<TrainingReport> {
    config.validate()?;
    let shape = config.shape();
    let hosts = config.training.hosts;
    let seed = config.common_seed();
    let initial = PlainWeights::init(&shape, &mut BlakeRNG::derived(&seed, b"weights"));
    let activation = config.activation().compile()?;
    let network = PlainNetwork::new(
        shape, activation.clone(), config.training.learning_rate, config.training.momentum, hosts,
    );
    let settings = PartySettings {
        shape,
        timeout: Duration::from_millis(config.protocol.timeout_ms),
        tree_height: BinaryTree::new(hosts).height(),
        batch_size: config.training.batch_size,
        delay: config.protocol.delay_party
            .map(|party| (party, config.protocol.delay_iteration, Duration::from_millis(config.protocol.delay_ms))),
    };
    let run = Run {
        train,
        validation,
        settings: &settings,
        initial: &initial,
        shadow: shadow.then(|| network.clone()),
        seed: &seed,
        iterations: config.iterations(),
    };
    log::info!(
        "[train] {} hosts, {} iterations, {} mode",
        hosts, run.iterations, if config.training.train_encrypted {"encrypted"} else {"plaintext"}
    );

    if !config.training.train_encrypted {
        return run.execute((0..hosts).map(|_| PlainEngine::new(network.clone())).collect());
    }

    let c = &config.crypto;
    PackingPlan::check_shape(&shape, 1usize << c.log_n.saturating_sub(1), c.levels)?;
    let contexts = (0..hosts)
        .map(|party| HeContext::new(config.encryption_parameters(&seed, party), config.security_level()))
        .collect::<Result<Vec<_>>>()?;
    let plan = PackingPlan::new(shape, &contexts[0])?;
    let participants = contexts.iter().enumerate()
        .map(|(party, context)| Participant::new(context.clone(), seed, hosts, party))
        .collect::<Vec<_>>();
    let keys = CollectiveKeys::generate(contexts[0].clone(), &participants, plan.galois_elts())?;
    let evaluation_keys = Arc::new(EvaluationKeys { relin_keys: keys.relin_keys, galois_keys: keys.galois_keys });
    let encrypted = EncryptedSettings {
        plan,
        scale: config.scale(),
        learning_rate: config.training.learning_rate,
        momentum: config.training.momentum,
        party_count: hosts,
        mask_bound_bits: c.mask_bound_bits,
        common_seed: seed,
    };
    let engines = participants.into_iter()
        .map(|p| EncryptedEngine::new(p, keys.public_key.clone(), evaluation_keys.clone(), &activation, &encrypted))
        .collect::<Result<Vec<_>>>()?;
    run.execute(engines)
}

struct Run<'a> {
    train: &'a Dataset,
    validation: &'a Dataset,
    settings: &'a PartySettings,
    initial: &'a PlainWeights,
    shadow: Option<PlainNetwork>,
    seed: &'a PRNGSeed,
    iterations: usize,
}

impl<'a> Run<'a> {

    fn execute<E: Engine>(self, engines: Vec<E>) -> Result<TrainingReport> {
        let count = engines.len();
        let mut parties = connect(&BinaryTree::new(count)).into_iter().zip(engines)
            .map(|(endpoint, engine)| {
                let party = endpoint.party;
                let shard = self.train.shard(party, count);
                Party::new(endpoint, engine, shard, BatchSampler::new(self.seed, party), self.settings, self.shadow.clone())
            })
            .collect::<Vec<_>>();
        let root = parties.remove(0);
        let initial = root.engine().lift(self.initial);
        let shadow_initial = self.shadow.as_ref().map(|_| self.initial.clone());
        let iterations = self.iterations;

        let (outcome, children) = std::thread::scope(|scope| {
            let handles = parties.into_iter()
                .map(|party| scope.spawn(move || party.run_child()))
                .collect::<Vec<_>>();
            let outcome = root.run_root(initial, shadow_initial, iterations);
            let children = handles.into_iter().map(|h| h.join()).collect::<Vec<_>>();
            (outcome, children)
        });

        let RootOutcome { party, weights, shadow, gradient_log, completed, aborted } = outcome;
        let average = completed.max(1);
        let (engine, report) = party.into_report(average);
        let mut engines = vec![engine];
        let mut reports = vec![report];
        for child in children {
            let child = child.map_err(|_| Error::Protocol("a party thread panicked".into()))?;
            let (engine, report) = child.into_report(average);
            engines.push(engine);
            reports.push(report);
        }

        let evaluation = if self.validation.is_empty() {self.train} else {self.validation};
        let scores = E::scores(&engines, evaluation.inputs(), &weights)?;
        let validation_error = error_rate(&scores, evaluation.labels());
        let weights = E::reveal(&engines, &weights)?;
        log::info!(
            "[train] {} of {} iterations committed, error {:.3} on {} samples",
            completed, iterations, validation_error, evaluation.len()
        );
        Ok(TrainingReport {
            iterations,
            completed,
            weights,
            shadow,
            gradient_log,
            validation_error,
            parties: reports,
            aborted,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellcnn::MatrixOps;
    use approx::assert_abs_diff_eq;

    fn plain_config(hosts: usize, samples: usize) -> Config {
        let mut config = Config::default();
        config.network.samples = samples;
        config.network.cells = 8;
        config.network.features = 4;
        config.network.filters = 2;
        config.network.classes = 2;
        config.training.batch_size = 4;
        config.training.hosts = hosts;
        config.training.train_encrypted = false;
        config.training.deterministic = true;
        config.training.learning_rate = 0.5;
        config.data.synthetic = true;
        config.protocol.seed = 9;
        config
    }

    fn data(samples: usize) -> Dataset {
        Dataset::synthetic(samples, 8, 4, 2, &PRNGSeed::from_u64(21)).unwrap()
    }

    #[test]
    fn test_plain_run_is_reproducible() {
        let config = plain_config(1, 8);
        let train_set = data(8);
        let first = train(&config, &train_set, &data(0), false).unwrap();
        let second = train(&config, &train_set, &data(0), false).unwrap();
        assert_eq!((first.iterations, first.completed), (2, 2));
        assert!(first.aborted.is_none());
        assert_eq!(first.gradient_log, second.gradient_log);
        assert_eq!(first.weights, second.weights);

        let initial = PlainWeights::init(&config.shape(), &mut BlakeRNG::derived(&config.common_seed(), b"weights"));
        let moved = first.weights.conv.sub(&(), &initial.conv).unwrap().frobenius_norm()
            + first.weights.dense.sub(&(), &initial.dense).unwrap().frobenius_norm();
        assert!(moved > 0.0);
        assert!((0.0..=1.0).contains(&first.validation_error));
    }

    #[test]
    fn test_reference_plaintext_run() {
        let mut config = Config::default();
        config.network = crate::config::NetworkConfig {
            samples: 200, cells: 200, features: 38, filters: 8, classes: 2, ..Default::default()
        };
        config.training.hosts = 1;
        config.training.train_encrypted = false;
        config.training.deterministic = true;
        config.training.batch_size = 50;
        config.training.learning_rate = 0.01;
        config.training.momentum = 0.9;
        config.training.epochs = 1;
        config.data.synthetic = true;
        let (train_set, validation) = config.load_data().unwrap();
        assert_eq!(train_set.len(), 200);

        let first = train(&config, &train_set, &validation, false).unwrap();
        assert!(first.aborted.is_none());
        assert_eq!(first.completed, config.iterations());
        assert!(first.completed >= 2);
        let initial = PlainWeights::init(&config.shape(), &mut BlakeRNG::derived(&config.common_seed(), b"weights"));
        assert!(first.weights.dense.sub(&(), &initial.dense).unwrap().frobenius_norm() > 0.0);
        assert!((0.0..=1.0).contains(&first.validation_error));

        let second = train(&config, &train_set, &validation, false).unwrap();
        assert_eq!(first.gradient_log, second.gradient_log);
        assert_eq!(first.weights, second.weights);
        assert_eq!(first.validation_error, second.validation_error);
    }

    #[test]
    fn test_plain_tree_with_shadow() {
        let config = plain_config(3, 12);
        let report = train(&config, &data(12), &data(4), true).unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.parties.len(), 3);
        assert_eq!(report.parties.iter().map(|p| p.party).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(report.parties.iter().all(|p| p.momentum.is_some()));
        // The shadow of a plaintext run is the run itself.
        assert_eq!(report.shadow.as_ref(), Some(&report.weights));
        report.check_precision(20.0, true).unwrap();
    }

    #[test]
    fn test_drifted_weights_warn_unless_strict() {
        let config = plain_config(1, 8);
        let mut report = train(&config, &data(8), &data(0), true).unwrap();
        let drifted = report.weights.dense.re(0, 0) + 0.5;
        report.weights.dense.set(0, 0, num_complex::Complex::new(drifted, 0.0));

        report.check_precision(20.0, false).unwrap();
        match report.check_precision(20.0, true) {
            Err(e @ Error::Precision { .. }) => assert_eq!(e.exit_code(), 4),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_stalled_party_aborts_without_touching_momentum() {
        let train_set = data(8);
        let mut config = plain_config(3, 8);
        config.protocol.timeout_ms = 200;
        config.protocol.delay_party = Some(2);
        config.protocol.delay_iteration = 1;
        config.protocol.delay_ms = 500;
        let stalled = train(&config, &train_set, &data(0), false).unwrap();

        assert_eq!(stalled.completed, 1);
        assert_eq!(stalled.gradient_log.len(), 1);
        match &stalled.aborted {
            Some(Error::IterationAborted { iteration: 1, cause }) => {
                assert!(matches!(**cause, Error::PartyTimeout { party: 2, .. }));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(stalled.aborted.as_ref().map(Error::exit_code), Some(2));

        let mut clean = plain_config(3, 4);
        clean.protocol.timeout_ms = 200;
        let clean = train(&clean, &train_set, &data(0), false).unwrap();
        assert_eq!(clean.completed, 1);
        assert_eq!(stalled.weights, clean.weights);
        for (a, b) in stalled.parties.iter().zip(&clean.parties) {
            assert_eq!(a.momentum, b.momentum);
        }
    }

    #[test]
    fn test_oversized_network_fails_before_keygen() {
        let mut config = Config::default();
        config.network.samples = 200;
        config.network.features = 256;
        config.network.filters = 32;
        config.network.classes = 8;
        config.network.cells = 2;
        config.training.batch_size = 200;
        config.crypto.log_n = 15;
        config.crypto.secure = false;
        let tiny = Dataset::synthetic(2, 2, 256, 8, &PRNGSeed::from_u64(1)).unwrap();
        let error = train(&config, &tiny, &tiny, false).unwrap_err();
        assert!(matches!(error, Error::CapacityExceeded { available: 16384, .. }));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_encrypted_tree_tracks_the_shadow() {
        let mut config = plain_config(3, 4);
        config.training.train_encrypted = true;
        config.crypto.log_n = 10;
        config.crypto.levels = 10;
        config.crypto.secure = false;
        let report = train(&config, &data(4), &data(0), true).unwrap();
        assert_eq!(report.completed, 1);
        assert!(report.aborted.is_none());
        assert!(report.parties.iter().all(|p| p.momentum.is_none() && p.shadow_momentum.is_some()));
        assert!(report.parties[1].phases.iter().any(|(name, _)| name == "refresh"));

        let shadow = report.shadow.as_ref().unwrap();
        for (got, want) in report.weights.conv.data().iter().zip(shadow.conv.data()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-4);
        }
        for (got, want) in report.weights.dense.data().iter().zip(shadow.dense.data()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-4);
        }
        report.check_precision(10.0, true).unwrap();
        assert!((0.0..=1.0).contains(&report.validation_error));
    }

    fn encrypted_config(hosts: usize, samples: usize) -> Config {
        let mut config = plain_config(hosts, samples);
        config.training.train_encrypted = true;
        config.crypto.log_n = 10;
        config.crypto.levels = 10;
        config.crypto.secure = false;
        config
    }

    #[test]
    fn test_encrypted_runs_repeat_bit_for_bit() {
        let config = encrypted_config(2, 8);
        let first = train(&config, &data(8), &data(0), false).unwrap();
        let second = train(&config, &data(8), &data(0), false).unwrap();
        assert_eq!(first.completed, 2);
        assert!(first.aborted.is_none() && second.aborted.is_none());
        assert_eq!(first.gradient_log.len(), 2);
        assert!(first.gradient_log.iter().all(|bytes| !bytes.is_empty()));
        assert_eq!(first.gradient_log, second.gradient_log);
    }

    #[test]
    fn test_encrypted_momentum_carries_across_iterations() {
        let config = encrypted_config(3, 12);
        let report = train(&config, &data(12), &data(4), true).unwrap();
        assert_eq!(report.completed, 3);
        assert!(report.aborted.is_none());
        assert_eq!(report.gradient_log.len(), 3);

        let shadow = report.shadow.as_ref().unwrap();
        for (got, want) in report.weights.conv.data().iter().zip(shadow.conv.data()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-4);
        }
        for (got, want) in report.weights.dense.data().iter().zip(shadow.dense.data()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-4);
        }
        report.check_precision(10.0, true).unwrap();
    }

    #[test]
    fn test_bad_crypto_config_is_a_config_error() {
        let mut config = encrypted_config(1, 4);
        config.crypto.log_scale = 62;
        let error = train(&config, &data(4), &data(0), false).unwrap_err();
        assert!(matches!(error, Error::Config(_)));
        assert_eq!(error.exit_code(), 1);

        let mut config = encrypted_config(1, 4);
        config.network.degree = 5;
        assert!(matches!(train(&config, &data(4), &data(0), false), Err(Error::Config(_))));
    }
}

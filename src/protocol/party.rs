use std::time::Duration;

use super::{
    engine::Engine,
    messages::{model_from_wire, model_to_wire, Message, WireTensor},
    tree::{Endpoint, Link},
};
use crate::{
    cellcnn::{BatchSampler, Dataset, Matrix, ModelParams, MomentumState, NetworkShape, PlainGradients, PlainNetwork, PlainWeights},
    multiparty::RefreshShare,
    serialize::SerializableWithHeContext,
    util::{hash, Timer},
    Ciphertext, Error, Result,
};

/// Settings every party of a run shares.
#[derive(Clone, Debug)]
pub struct PartySettings {
    pub shape: NetworkShape,
    pub timeout: Duration,
    /// Height of the tree; bounds how long a child waits on its parent.
    pub tree_height: usize,
    pub batch_size: usize,
    /// `(party, iteration, pause)`: stall one party before its forward pass.
    pub delay: Option<(usize, usize, Duration)>,
}

/// Plaintext model trained alongside, on the same batches.
struct Shadow {
    network: PlainNetwork,
    momentum: MomentumState<Matrix>,
}

/// What is left of a party once the run is over.
#[derive(Clone, Debug)]
pub struct PartyReport {
    pub party: usize,
    /// Committed previous gradient, when the engine holds it in the clear.
    pub momentum: Option<PlainGradients>,
    pub shadow_momentum: Option<PlainGradients>,
    pub phases: Vec<(String, Duration)>,
}

/// End state of the root.
pub struct RootOutcome<E: Engine> {
    pub party: Party<E>,
    pub weights: ModelParams<E::Tensor>,
    pub shadow: Option<PlainWeights>,
    /// Serialized aggregated gradient of every committed iteration.
    pub gradient_log: Vec<Vec<u8>>,
    pub completed: usize,
    pub aborted: Option<Error>,
}

type Subtotal<T> = (ModelParams<T>, Option<PlainGradients>);

/**
One party of the training tree.

Every iteration walks the same phases: the root broadcasts the global
weights, each party runs its forward pass on a local mini-batch, the
forward outputs travel up, get refreshed collectively and come back down,
each party runs its backward pass, and the momentum-adjusted gradients are
summed up the tree. The root applies the sum and broadcasts `Commit`; only
then does a party replace its previous gradient. `Abort` drops the staged
gradient instead.
*/
pub struct Party<E: Engine> {
    id: usize,
    endpoint: Endpoint,
    timeout: Duration,
    parent_timeout: Duration,
    engine: E,
    shard: Dataset,
    sampler: BatchSampler,
    batch_size: usize,
    momentum: MomentumState<E::Tensor>,
    shadow: Option<Shadow>,
    delay: Option<(usize, Duration)>,
    timer: Timer,
}

impl<E: Engine> Party<E> {

    pub fn new(
        endpoint: Endpoint, engine: E, shard: Dataset, sampler: BatchSampler,
        settings: &PartySettings, shadow: Option<PlainNetwork>,
    ) -> Self {
        let id = endpoint.party;
        let zeros = PlainWeights::zeros(&settings.shape);
        let momentum = MomentumState::new(engine.lift(&zeros));
        let shadow = shadow.map(|network| Shadow { network, momentum: MomentumState::new(zeros) });
        let delay = settings.delay.filter(|(party, _, _)| *party == id).map(|(_, iteration, pause)| (iteration, pause));
        Self {
            id,
            endpoint,
            timeout: settings.timeout,
            parent_timeout: settings.timeout * (settings.tree_height as u32 + 2),
            engine,
            shard,
            sampler,
            batch_size: settings.batch_size,
            momentum,
            shadow,
            delay,
            timer: Timer::new(),
        }
    }

    pub fn id(&self) -> usize {self.id}
    pub fn engine(&self) -> &E {&self.engine}
    pub fn momentum(&self) -> &MomentumState<E::Tensor> {&self.momentum}

    pub fn into_report(self, iterations: usize) -> (E, PartyReport) {
        let report = PartyReport {
            party: self.id,
            momentum: E::as_plain(self.momentum.previous()),
            shadow_momentum: self.shadow.as_ref().map(|s| s.momentum.previous().clone()),
            phases: self.timer.gather(iterations),
        };
        (self.engine, report)
    }

    fn parent(&self) -> Result<&Link> {
        self.endpoint.parent.as_ref()
            .ok_or_else(|| Error::Protocol(format!("party {} has no parent", self.id)))
    }

    /// Next message from the parent. An `Abort` is passed on to the
    /// children and surfaces as [Error::IterationAborted].
    fn from_parent(&self, phase: &'static str) -> Result<Message> {
        match self.parent()?.receive(self.parent_timeout, phase)? {
            Message::Abort { iteration } => {
                self.endpoint.broadcast(|| Message::Abort { iteration })?;
                Err(Error::IterationAborted {
                    iteration,
                    cause: Box::new(Error::Protocol("aborted by the root".into())),
                })
            }
            message => Ok(message),
        }
    }

    fn commit(&mut self) {
        self.momentum.commit();
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.momentum.commit();
        }
    }

    fn rollback(&mut self) {
        self.momentum.rollback();
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.momentum.rollback();
        }
    }

    /// Local work of one iteration plus the subtree aggregation. Returns
    /// the gradients summed over this party's subtree.
    fn iteration(
        &mut self, iteration: usize, weights: &ModelParams<E::Tensor>, shadow_weights: Option<&PlainWeights>,
    ) -> Result<Subtotal<E::Tensor>> {
        if let Some((at, pause)) = self.delay {
            if at == iteration {
                log::warn!("[party {}] stalling {} ms in iteration {}", self.id, pause.as_millis(), iteration);
                std::thread::sleep(pause);
            }
        }
        let indices = self.sampler.sample(self.shard.len(), self.batch_size);
        let (batch, labels) = self.shard.batch(&indices);
        let previous = self.momentum.previous().clone();

        let engine = &self.engine;
        let pack = self.timer.scope("forward", || engine.forward(&batch, weights, &previous))?;
        let refreshed = match pack {
            Some(pack) => {
                let index = self.timer.register("refresh");
                self.timer.tick(index);
                let refreshed = self.refresh_round(iteration, &pack)?;
                self.timer.tock(index);
                Some(refreshed)
            }
            None => None,
        };

        let engine = &self.engine;
        let gradients = self.timer.scope("backward", || {
            engine.gradients(refreshed.as_ref(), &batch, &labels, weights, &previous)
        })?;
        let shadow = match (&self.shadow, shadow_weights) {
            (Some(shadow), Some(w)) => Some(shadow.network.gradients(&batch, &labels, w, shadow.momentum.previous())?),
            _ => None,
        };
        self.momentum.stage(gradients.clone());
        if let (Some(s), Some(g)) = (self.shadow.as_mut(), shadow.as_ref()) {
            s.momentum.stage(g.clone());
        }
        log::debug!("[party {}] local gradients of iteration {} staged", self.id, iteration);

        let index = self.timer.register("aggregate");
        self.timer.tick(index);
        let subtotal = self.subtree_sum(iteration, gradients, shadow)?;
        self.timer.tock(index);
        Ok(subtotal)
    }

    /// Collective refresh of every party's forward output; returns this
    /// party's refreshed tensor.
    fn refresh_round(&self, iteration: usize, pack: &Ciphertext) -> Result<Ciphertext> {
        let refresher = self.engine.refresher()
            .ok_or_else(|| Error::Protocol("forward output without a refresher".into()))?;
        let context = refresher.context();

        let mut packs = vec![(self.id, WireTensor::from_ciphertext(context, pack)?)];
        for child in &self.endpoint.children {
            match child.receive(self.timeout, "refresh")? {
                Message::LocalPacks { iteration: i, packs: more } if i == iteration => packs.extend(more),
                Message::Failed { iteration: i, cause } if i == iteration => return Err(cause),
                other => return Err(other.unexpected(iteration, "LocalPacks")),
            }
        }
        let packs = match &self.endpoint.parent {
            None => {
                packs.sort_by_key(|(party, _)| *party);
                if !packs.iter().map(|(party, _)| *party).eq(0..packs.len()) {
                    return Err(Error::Protocol(format!(
                        "forward outputs of parties {:?} do not cover the tree",
                        packs.iter().map(|(party, _)| *party).collect::<Vec<_>>()
                    )));
                }
                let packs = packs.into_iter().map(|(_, wire)| wire).collect::<Vec<_>>();
                self.endpoint.broadcast(|| Message::RefreshRound { iteration, packs: packs.clone() })?;
                packs
            }
            Some(parent) => {
                parent.send(Message::LocalPacks { iteration, packs })?;
                match self.from_parent("refresh")? {
                    Message::RefreshRound { iteration: i, packs } if i == iteration => {
                        self.endpoint.broadcast(|| Message::RefreshRound { iteration, packs: packs.clone() })?;
                        packs
                    }
                    other => return Err(other.unexpected(iteration, "RefreshRound")),
                }
            }
        };
        let ciphers = packs.iter().map(|w| w.to_ciphertext(context)).collect::<Result<Vec<_>>>()?;

        let protocols = (0..ciphers.len()).map(|index| refresher.protocol(iteration, index)).collect::<Vec<_>>();
        let mut shares = protocols.iter().zip(&ciphers).map(|(p, c)| refresher.share(p, c)).collect::<Vec<_>>();
        for child in &self.endpoint.children {
            let incoming = match child.receive(self.timeout, "refresh")? {
                Message::RefreshShares { iteration: i, shares } if i == iteration => shares,
                Message::Failed { iteration: i, cause } if i == iteration => return Err(cause),
                other => return Err(other.unexpected(iteration, "RefreshShares")),
            };
            if incoming.len() != ciphers.len() {
                return Err(Error::ShareMismatch(format!(
                    "party {} sent {} refresh shares for {} tensors", child.peer(), incoming.len(), ciphers.len()
                )));
            }
            for (index, bytes) in incoming.iter().enumerate() {
                let share = RefreshShare::deserialize(context, &mut bytes.as_slice())?;
                protocols[index].aggregate(&mut shares[index], &share, &ciphers[index], child.peer())?;
            }
        }

        let refreshed = match &self.endpoint.parent {
            None => {
                let refreshed = protocols.iter().zip(&ciphers).zip(&shares)
                    .map(|((p, c), s)| refresher.finish(p, c, s))
                    .collect::<Result<Vec<_>>>()?;
                let wire = refreshed.iter()
                    .map(|c| WireTensor::from_ciphertext(context, c))
                    .collect::<Result<Vec<_>>>()?;
                self.endpoint.broadcast(|| Message::Refreshed { iteration, packs: wire.clone() })?;
                wire
            }
            Some(parent) => {
                let bytes = shares.iter()
                    .map(|share| -> Result<Vec<u8>> {
                        let mut out = Vec::with_capacity(share.serialized_size(context));
                        share.serialize(context, &mut out)?;
                        Ok(out)
                    })
                    .collect::<Result<Vec<_>>>()?;
                parent.send(Message::RefreshShares { iteration, shares: bytes })?;
                match self.from_parent("refresh")? {
                    Message::Refreshed { iteration: i, packs } if i == iteration => {
                        self.endpoint.broadcast(|| Message::Refreshed { iteration, packs: packs.clone() })?;
                        packs
                    }
                    other => return Err(other.unexpected(iteration, "Refreshed")),
                }
            }
        };
        refreshed.get(self.id)
            .ok_or_else(|| Error::Protocol(format!("no refreshed tensor for party {}", self.id)))?
            .to_ciphertext(context)
    }

    /// Own gradients plus the subtotals of the children, in child order.
    fn subtree_sum(
        &self, iteration: usize, own: ModelParams<E::Tensor>, shadow: Option<PlainGradients>,
    ) -> Result<Subtotal<E::Tensor>> {
        let mut gradients = vec![own];
        let mut shadows = shadow.into_iter().collect::<Vec<_>>();
        for child in &self.endpoint.children {
            match child.receive(self.timeout, "aggregate")? {
                Message::ChildUpdatedLocalWeights { iteration: i, gradients: g, shadow: s } if i == iteration => {
                    gradients.push(self.engine.decode(&g)?);
                    if let Some(s) = s {
                        shadows.push(model_from_wire(&s, WireTensor::to_matrix)?);
                    }
                }
                Message::Failed { iteration: i, cause } if i == iteration => return Err(cause),
                other => return Err(other.unexpected(iteration, "ChildUpdatedLocalWeights")),
            }
        }
        let sum = ModelParams::sum_in_order(self.engine.backend(), &gradients)?;
        let shadow = match &self.shadow {
            Some(_) if shadows.len() != gradients.len() => {
                return Err(Error::Protocol(format!(
                    "{} shadow gradients for {} gradients", shadows.len(), gradients.len()
                )));
            }
            Some(_) => Some(ModelParams::sum_in_order(&(), &shadows)?),
            None => None,
        };
        Ok((sum, shadow))
    }

    fn child_iteration(
        &mut self, iteration: usize, weights: &[WireTensor], ct_sizes: &[usize], shadow: Option<&[WireTensor]>,
    ) -> Result<()> {
        if ct_sizes.len() != weights.len() || weights.iter().zip(ct_sizes).any(|(w, &size)| w.bytes.len() != size) {
            return Err(Error::ShareMismatch(format!(
                "weights of iteration {} announced as {:?} bytes, received {:?}",
                iteration, ct_sizes, weights.iter().map(|w| w.bytes.len()).collect::<Vec<_>>()
            )));
        }
        let weights = self.engine.decode(weights)?;
        let shadow_weights = shadow.map(|w| model_from_wire(w, WireTensor::to_matrix)).transpose()?;
        let (gradients, shadow) = self.iteration(iteration, &weights, shadow_weights.as_ref())?;

        let gradients = self.engine.encode(&gradients)?;
        let shadow = shadow.map(|g| model_to_wire(&g, WireTensor::from_matrix)).transpose()?;
        self.parent()?.send(Message::ChildUpdatedLocalWeights { iteration, gradients, shadow })?;
        match self.from_parent("commit")? {
            Message::Commit { iteration: i } if i == iteration => {
                self.endpoint.broadcast(|| Message::Commit { iteration })?;
                self.commit();
                Ok(())
            }
            other => Err(other.unexpected(iteration, "Commit")),
        }
    }

    /// Serve the parent until it terminates the run or goes silent.
    pub fn run_child(mut self) -> Self {
        loop {
            let message = match self.parent().and_then(|p| p.receive(self.parent_timeout, "idle")) {
                Ok(message) => message,
                Err(e) => {
                    log::error!("[party {}] leaving: {}", self.id, e);
                    self.rollback();
                    return self;
                }
            };
            match message {
                Message::NewEncryptedIteration { iteration, weights, ct_sizes, shadow } => {
                    let result = self.endpoint
                        .broadcast(|| Message::NewEncryptedIteration {
                            iteration,
                            weights: weights.clone(),
                            ct_sizes: ct_sizes.clone(),
                            shadow: shadow.clone(),
                        })
                        .and_then(|_| self.child_iteration(iteration, &weights, &ct_sizes, shadow.as_deref()));
                    match result {
                        Ok(()) => {}
                        Err(e @ Error::IterationAborted { .. }) => {
                            log::warn!("[party {}] {}", self.id, e);
                            self.rollback();
                        }
                        Err(cause) => {
                            log::error!("[party {}] iteration {} failed: {}", self.id, iteration, cause);
                            self.rollback();
                            if let Err(e) = self.parent().and_then(|p| p.send(Message::Failed { iteration, cause })) {
                                log::warn!("[party {}] {}", self.id, e);
                            }
                        }
                    }
                }
                Message::Abort { iteration } => {
                    log::warn!("[party {}] iteration {} aborted", self.id, iteration);
                    if let Err(e) = self.endpoint.broadcast(|| Message::Abort { iteration }) {
                        log::warn!("[party {}] {}", self.id, e);
                    }
                    self.rollback();
                }
                Message::Terminate => {
                    if let Err(e) = self.endpoint.broadcast(|| Message::Terminate) {
                        log::warn!("[party {}] {}", self.id, e);
                    }
                    return self;
                }
                other => log::warn!("[party {}] ignoring {} while idle", self.id, other.name()),
            }
        }
    }

    fn root_iteration(
        &mut self, iteration: usize, weights: &ModelParams<E::Tensor>, shadow_weights: Option<&PlainWeights>,
    ) -> Result<(ModelParams<E::Tensor>, Option<PlainWeights>, Vec<u8>)> {
        let wire = self.engine.encode(weights)?;
        let ct_sizes = wire.iter().map(|w| w.bytes.len()).collect::<Vec<_>>();
        let shadow_wire = shadow_weights.map(|w| model_to_wire(w, WireTensor::from_matrix)).transpose()?;
        self.endpoint.broadcast(|| Message::NewEncryptedIteration {
            iteration,
            weights: wire.clone(),
            ct_sizes: ct_sizes.clone(),
            shadow: shadow_wire.clone(),
        })?;

        let (gradient, shadow_gradient) = self.iteration(iteration, weights, shadow_weights)?;

        let index = self.timer.register("update");
        self.timer.tick(index);
        let updated = weights.apply_update(self.engine.backend(), &gradient)?;
        let shadow = match (shadow_weights, &shadow_gradient) {
            (Some(w), Some(g)) => Some(w.apply_update(&(), g)?),
            _ => None,
        };
        self.timer.tock(index);

        let log = self.engine.encode(&gradient)?.into_iter().flat_map(|w| w.bytes).collect::<Vec<_>>();
        self.endpoint.broadcast(|| Message::Commit { iteration })?;
        self.commit();
        log::info!("[party 0] iteration {} committed, gradient {}", iteration, &hash::hex(&hash::hash_bytes(&log))[..16]);
        Ok((updated, shadow, log))
    }

    /// Drive `iterations` iterations from the root. The run stops at the
    /// first aborted iteration; the children are always terminated.
    pub fn run_root(
        mut self, initial: ModelParams<E::Tensor>, shadow: Option<PlainWeights>, iterations: usize,
    ) -> RootOutcome<E> {
        let mut weights = initial;
        let mut shadow_weights = shadow;
        let mut gradient_log = vec![];
        let mut completed = 0;
        let mut aborted = None;
        for iteration in 0..iterations {
            match self.root_iteration(iteration, &weights, shadow_weights.as_ref()) {
                Ok((w, s, bytes)) => {
                    weights = w;
                    shadow_weights = s;
                    gradient_log.push(bytes);
                    completed += 1;
                }
                Err(cause) => {
                    log::error!("[party 0] iteration {} failed: {}", iteration, cause);
                    if let Err(e) = self.endpoint.broadcast(|| Message::Abort { iteration }) {
                        log::warn!("[party 0] {}", e);
                    }
                    self.rollback();
                    aborted = Some(match cause {
                        e @ Error::IterationAborted { .. } => e,
                        cause => Error::IterationAborted { iteration, cause: Box::new(cause) },
                    });
                    break;
                }
            }
        }
        if let Err(e) = self.endpoint.broadcast(|| Message::Terminate) {
            log::warn!("[party 0] {}", e);
        }
        RootOutcome { party: self, weights, shadow: shadow_weights, gradient_log, completed, aborted }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellcnn::Activation;
    use crate::protocol::engine::PlainEngine;
    use crate::protocol::tree::{connect, BinaryTree};
    use crate::util::PRNGSeed;
    use rand::SeedableRng;

    fn setup() -> (PlainNetwork, Dataset, PartySettings, PlainWeights) {
        let shape = NetworkShape { batch: 4, cells: 8, features: 4, filters: 2, classes: 2 };
        let network = PlainNetwork::new(shape, Activation::default().compile().unwrap(), 0.5, 0.9, 1);
        let data = Dataset::synthetic(16, shape.cells, shape.features, shape.classes, &PRNGSeed::from_u64(5)).unwrap();
        let settings = PartySettings {
            shape,
            timeout: Duration::from_millis(100),
            tree_height: 0,
            batch_size: shape.batch,
            delay: None,
        };
        let initial = PlainWeights::init(&shape, &mut rand_chacha::ChaCha8Rng::seed_from_u64(2));
        (network, data, settings, initial)
    }

    #[test]
    fn test_single_party_steps_like_the_network() {
        let (network, data, settings, initial) = setup();
        let seed = PRNGSeed::from_u64(3);
        let endpoint = connect(&BinaryTree::new(1)).pop().unwrap();
        let party = Party::new(endpoint, PlainEngine::new(network.clone()), data.clone(), BatchSampler::new(&seed, 0), &settings, Some(network.clone()));
        let outcome = party.run_root(initial.clone(), Some(initial.clone()), 1);
        assert_eq!(outcome.completed, 1);
        assert!(outcome.aborted.is_none());

        let mut sampler = BatchSampler::new(&seed, 0);
        let (batch, labels) = data.batch(&sampler.sample(data.len(), settings.batch_size));
        let gradient = network.gradients(&batch, &labels, &initial, &PlainWeights::zeros(&settings.shape)).unwrap();
        let expected = initial.apply_update(&(), &gradient).unwrap();
        assert_eq!(outcome.weights, expected);
        assert_eq!(outcome.shadow.as_ref(), Some(&expected));
        assert_eq!(outcome.party.momentum().previous(), &gradient);
        assert_eq!(outcome.gradient_log.len(), 1);

        let (_, report) = outcome.party.into_report(1);
        assert_eq!(report.momentum, Some(gradient.clone()));
        assert_eq!(report.shadow_momentum, Some(gradient));
        assert!(report.phases.iter().any(|(name, _)| name == "backward"));
    }

    #[test]
    fn test_silent_child_aborts_the_run() {
        let (network, data, mut settings, initial) = setup();
        settings.tree_height = 1;
        let mut endpoints = connect(&BinaryTree::new(2));
        let child = endpoints.pop().unwrap();
        let root = endpoints.pop().unwrap();
        let party = Party::new(root, PlainEngine::new(network), data, BatchSampler::new(&PRNGSeed::from_u64(4), 0), &settings, None);
        let outcome = party.run_root(initial.clone(), None, 3);

        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.weights, initial);
        assert!(!outcome.party.momentum().has_staged());
        match outcome.aborted {
            Some(Error::IterationAborted { iteration: 0, cause }) => {
                assert!(matches!(*cause, Error::PartyTimeout { party: 1, phase: "aggregate" }));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let parent = child.parent.as_ref().unwrap();
        let timeout = Duration::from_millis(10);
        assert!(matches!(parent.receive(timeout, "t"), Ok(Message::NewEncryptedIteration { iteration: 0, .. })));
        assert!(matches!(parent.receive(timeout, "t"), Ok(Message::Abort { iteration: 0 })));
        assert!(matches!(parent.receive(timeout, "t"), Ok(Message::Terminate)));
    }
}

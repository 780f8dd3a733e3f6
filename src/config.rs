//! Run configuration: a TOML file with one table per concern, every field
//! defaulted, and command line flags layered on top.

use std::path::{Path, PathBuf};

use clap::Parser;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    cellcnn::{Activation, Dataset, NetworkShape},
    util::{self, PRNGSeed},
    EncryptionParameters, Error, Result, SecurityLevel,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationKind {
    Sigmoid,
    SigmoidApprox,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub samples: usize,
    pub cells: usize,
    pub features: usize,
    pub filters: usize,
    pub classes: usize,
    pub activation: ActivationKind,
    /// Fit interval of `sigmoid-approx`.
    pub interval: f64,
    /// Odd degree of `sigmoid-approx`.
    pub degree: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            samples: 200,
            cells: 200,
            features: 38,
            filters: 8,
            classes: 2,
            activation: ActivationKind::SigmoidApprox,
            interval: 3.0,
            degree: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub epochs: usize,
    /// Party count; parties form a binary tree rooted at party 0.
    pub hosts: usize,
    pub train_encrypted: bool,
    pub deterministic: bool,
    /// Relative precision, in bits, the decrypted weights must keep
    /// against the plaintext shadow.
    pub precision_bits: f64,
    /// Train the plaintext shadow alongside and log the precision of the
    /// final weights, warning below `precision_bits`.
    pub report_precision: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            learning_rate: 1.0,
            momentum: 0.9,
            epochs: 1,
            hosts: 1,
            train_encrypted: true,
            deterministic: false,
            precision_bits: 20.0,
            report_precision: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoConfig {
    pub log_n: usize,
    pub levels: usize,
    pub log_scale: usize,
    pub log_q0: usize,
    pub log_special: usize,
    pub mask_bound_bits: u32,
    /// Reject parameter sets below 128-bit security.
    pub secure: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { log_n: 15, levels: 10, log_scale: 40, log_q0: 60, log_special: 61, mask_bound_bits: 12, secure: true }
    }
}

impl CryptoConfig {

    /// Primes of `bits` bits congruent to 1 mod `2N` must be plentiful,
    /// so every prime size keeps this many bits above `log_n`.
    const PRIME_HEADROOM_BITS: usize = 12;

    fn validate(&self) -> Result<()> {
        let degree_bits = util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MIN as u64) as usize + 1
            ..=util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MAX as u64) as usize;
        if !degree_bits.contains(&self.log_n) {
            return Err(Error::Config(format!(
                "log_n must be in {}..={}, got {}", degree_bits.start(), degree_bits.end(), self.log_n
            )));
        }
        let lowest = (self.log_n + Self::PRIME_HEADROOM_BITS).max(util::HE_MOD_BIT_COUNT_MIN);
        // The scale primes straddle 2^log_scale, so it stays one bit under the cap.
        let sizes = [
            ("log_q0", self.log_q0, util::HE_MOD_BIT_COUNT_MAX),
            ("log_special", self.log_special, util::HE_MOD_BIT_COUNT_MAX),
            ("log_scale", self.log_scale, util::HE_MOD_BIT_COUNT_MAX - 1),
        ];
        for (name, bits, highest) in sizes {
            if !(lowest..=highest).contains(&bits) {
                return Err(Error::Config(format!(
                    "{} must be in {}..={} for log_n {}, got {}", name, lowest, highest, self.log_n, bits
                )));
            }
        }
        if self.mask_bound_bits as usize + self.log_scale >= self.log_q0 {
            return Err(Error::Config(format!(
                "masks of 2^{} at scale 2^{} overflow the base prime of {} bits",
                self.mask_bound_bits, self.log_scale, self.log_q0
            )));
        }
        Ok(())
    }

}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub timeout_ms: u64,
    /// Shared seed of a deterministic run.
    pub seed: u64,
    /// Fault injection: party that sleeps before its local step.
    pub delay_party: Option<usize>,
    pub delay_iteration: usize,
    pub delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { timeout_ms: 60000, seed: 0, delay_party: None, delay_iteration: 0, delay_ms: 0 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Directory of `X_<i>.csv` files.
    pub x_dir: Option<PathBuf>,
    /// Directory of `Y_<i>.csv` files.
    pub y_dir: Option<PathBuf>,
    /// Generate the data set instead of reading it, writing it to
    /// `x_dir` and `y_dir` when both are given.
    pub synthetic: bool,
    /// Samples past `samples` kept aside for the validation error.
    pub validation_samples: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub crypto: CryptoConfig,
    pub protocol: ProtocolConfig,
    pub data: DataConfig,
}

impl Config {

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("[config] loading {:?}", path);
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let n = &self.network;
        let t = &self.training;
        let positive = [
            ("samples", n.samples), ("cells", n.cells), ("features", n.features),
            ("filters", n.filters), ("classes", n.classes), ("batch_size", t.batch_size),
            ("epochs", t.epochs), ("hosts", t.hosts),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("{} must be positive", name)));
        }
        if n.samples % t.batch_size != 0 {
            return Err(Error::Config(format!("batch size {} does not divide {} samples", t.batch_size, n.samples)));
        }
        if !(t.learning_rate >= 0.0 && t.learning_rate.is_finite()) || !(t.momentum >= 0.0 && t.momentum.is_finite()) {
            return Err(Error::Config("learning rate and momentum must be non-negative".into()));
        }
        if t.train_encrypted && n.activation == ActivationKind::Sigmoid {
            return Err(Error::Config("encrypted training needs the sigmoid-approx activation".into()));
        }
        if t.train_encrypted && n.degree != 3 {
            return Err(Error::Config(format!("encrypted training evaluates a cubic activation, got degree {}", n.degree)));
        }
        if n.samples < t.hosts {
            return Err(Error::Config(format!("{} samples cannot be shared by {} hosts", n.samples, t.hosts)));
        }
        if let Some(party) = self.protocol.delay_party {
            if party >= t.hosts {
                return Err(Error::Config(format!("delayed party {} is not one of {} hosts", party, t.hosts)));
            }
        }
        self.crypto.validate()?;
        if self.protocol.timeout_ms == 0 {
            return Err(Error::Config("timeout must be positive".into()));
        }
        self.activation().compile().map(|_| ())
    }

    /// Training samples and the validation samples after them. Synthetic
    /// sets derive from the protocol seed, so they repeat across runs.
    pub fn load_data(&self) -> Result<(Dataset, Dataset)> {
        let n = &self.network;
        let total = n.samples + self.data.validation_samples;
        let data = if self.data.synthetic {
            let data = Dataset::synthetic(total, n.cells, n.features, n.classes, &PRNGSeed::from_u64(self.protocol.seed))?;
            if let (Some(x), Some(y)) = (&self.data.x_dir, &self.data.y_dir) {
                log::info!("[config] writing {} synthetic samples to {:?} and {:?}", total, x, y);
                data.save(x, y, n.cells)?;
            }
            data
        } else {
            match (&self.data.x_dir, &self.data.y_dir) {
                (Some(x), Some(y)) => Dataset::load(x, y, total, n.cells, n.features, n.classes)?,
                _ => return Err(Error::Config("give x_dir and y_dir, or ask for synthetic data".into())),
            }
        };
        Ok(data.split(n.samples))
    }

    pub fn shape(&self) -> NetworkShape {
        let n = &self.network;
        NetworkShape {
            batch: self.training.batch_size,
            cells: n.cells,
            features: n.features,
            filters: n.filters,
            classes: n.classes,
        }
    }

    pub fn activation(&self) -> Activation {
        match self.network.activation {
            ActivationKind::Sigmoid => Activation::Sigmoid,
            ActivationKind::SigmoidApprox => Activation::SigmoidApprox {
                interval: self.network.interval,
                degree: self.network.degree,
            },
        }
    }

    /// `Epochs * Samples / BatchSize`.
    pub fn iterations(&self) -> usize {
        self.training.epochs * self.network.samples / self.training.batch_size
    }

    pub fn security_level(&self) -> SecurityLevel {
        if self.crypto.secure {SecurityLevel::Tc128} else {SecurityLevel::None}
    }

    pub fn scale(&self) -> f64 {
        2f64.powi(self.crypto.log_scale as i32)
    }

    /// Seed shared by all parties; fresh entropy unless deterministic.
    pub fn common_seed(&self) -> PRNGSeed {
        if self.training.deterministic {
            PRNGSeed::from_u64(self.protocol.seed)
        } else {
            let mut seed = PRNGSeed::default();
            rand::thread_rng().fill_bytes(seed.as_mut());
            seed
        }
    }

    /// Parameters of one party's context. Deterministic runs seed every
    /// party's generator from the common seed and the party index.
    pub fn encryption_parameters(&self, common_seed: &PRNGSeed, party: usize) -> EncryptionParameters {
        let c = &self.crypto;
        let seed = self.training.deterministic
            .then(|| PRNGSeed::derive(common_seed, format!("party {}", party).as_bytes()));
        EncryptionParameters::ckks(c.log_n, c.levels, c.log_scale, c.log_q0, c.log_special)
            .set_random_seed(seed)
    }

}

/// Command line of the simulation harness. Flags override the file.
#[derive(Parser, Debug, Default)]
#[command(name = "cellcnn-he", about = "Train CellCNN under multiparty CKKS")]
pub struct Args {

    /// TOML configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub hosts: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(short = 'B', long = "batch-size")]
    pub batch_size: Option<usize>,

    #[arg(long = "learning-rate")]
    pub learning_rate: Option<f64>,

    #[arg(long)]
    pub momentum: Option<f64>,

    /// Train the plaintext network only.
    #[arg(long = "plain", action = clap::ArgAction::SetTrue)]
    pub plain: bool,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub deterministic: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long = "log-n")]
    pub log_n: Option<usize>,

    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    #[arg(long = "x-dir")]
    pub x_dir: Option<PathBuf>,

    #[arg(long = "y-dir")]
    pub y_dir: Option<PathBuf>,

    /// Generate a reproducible data set instead of reading one; with
    /// `--x-dir` and `--y-dir` it is also written there.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub synthetic: bool,

    /// Fail with exit code 4 when the decrypted weights drift from the
    /// plaintext shadow.
    #[arg(long = "check-precision", action = clap::ArgAction::SetTrue)]
    pub check_precision: bool,

    /// Debug logging.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Args {

    /// The file configuration (or the defaults) with the flags applied.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        let t = &mut config.training;
        if let Some(x) = self.hosts {t.hosts = x;}
        if let Some(x) = self.epochs {t.epochs = x;}
        if let Some(x) = self.batch_size {t.batch_size = x;}
        if let Some(x) = self.learning_rate {t.learning_rate = x;}
        if let Some(x) = self.momentum {t.momentum = x;}
        if self.plain {t.train_encrypted = false;}
        if self.deterministic {t.deterministic = true;}
        if let Some(x) = self.seed {config.protocol.seed = x;}
        if let Some(x) = self.timeout_ms {config.protocol.timeout_ms = x;}
        if let Some(x) = self.log_n {config.crypto.log_n = x;}
        if let Some(x) = &self.x_dir {config.data.x_dir = Some(x.clone());}
        if let Some(x) = &self.y_dir {config.data.y_dir = Some(x.clone());}
        if self.synthetic {config.data.synthetic = true;}
    }

    /// `Some(strict)` when the shadow runs: strict under
    /// `--check-precision`, a logged report when the file asks for one.
    pub fn precision_check(&self, config: &Config) -> Option<bool> {
        if self.check_precision {
            Some(true)
        } else {
            config.training.report_precision.then_some(false)
        }
    }

}

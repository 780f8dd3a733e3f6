//! Privacy-preserving CellCNN training under multiparty CKKS.
//!
//! The crate carries its own RNS-CKKS engine (NTT-form polynomials,
//! hybrid key switching with one special prime, hoisted rotations), the
//! collective key generation, decryption and refresh protocols of
//! [multiparty], the packed CellCNN kernels of [cellcnn], and the tree
//! protocol in [protocol] that trains them across simulated parties.

#![allow(clippy::needless_range_loop)]

pub mod util;
mod modulus;
mod encryption_parameters;
mod context;
mod text;
mod ckks_encoder;
mod key;
mod encryptor;
mod evaluator;
pub mod serialize;
pub mod multiparty;
mod error;
pub mod cellcnn;
pub mod config;
pub mod protocol;

pub(crate) use util::polysmallmod as polymod;

pub use modulus::{CoeffModulus, Modulus};
pub use encryption_parameters::{EncryptionParameters, SecurityLevel};
pub use context::HeContext;
pub use text::{Ciphertext, Plaintext};
pub use ckks_encoder::CKKSEncoder;
pub use key::{GaloisKeys, KSwitchKey, KeyGenerator, PublicKey, RelinKeys, SecretKey};
pub use encryptor::{Decryptor, Encryptor};
pub use evaluator::Evaluator;
pub use error::{Error, Result};

//! Multiparty HE
//!
//! Mouchet et al., 2020. Multiparty Homomorphic Encryption from Ring-Learning-with-Errors
//! <https://eprint.iacr.org/2020/304>
//!
//! Every party holds an additive share of the secret key. Keys are generated
//! collectively from common reference polynomials, and ciphertexts are
//! decrypted or refreshed from summed, noise-flooded shares.

pub mod participant;
pub mod refresh;

pub use participant::{
    CollectiveKeys, DecryptionProtocol, Participant, PolynomialRevelationProtocol,
    PublicKeyGenerationProtocol, RelinKeysGenerationParty, RelinKeysGenerationProtocol,
    RelinKeysShare, RotationKeysGenerationProtocol,
};
pub use refresh::{IdentityTransform, RefreshProtocol, RefreshShare, SlotTransform};

//! Tree protocol of the simulated parties.
//!
//! Parties run on their own threads and talk over in-process channels laid
//! out as a binary tree rooted at party 0. Every message names its
//! iteration; ciphertexts travel serialized with a header that the receiver
//! checks before using them. A party that does not answer within the
//! timeout aborts the iteration, and no party keeps state from an aborted
//! iteration.

pub mod engine;
pub mod messages;
pub mod party;
pub mod training;
pub mod tree;

pub use engine::{EncryptedEngine, EncryptedSettings, Engine, PlainEngine, Refresher};
pub use messages::{Message, WireTensor};
pub use party::{Party, PartyReport, PartySettings, RootOutcome};
pub use training::{train, TrainingReport};
pub use tree::{connect, BinaryTree, Endpoint, Link};

//! Provide various utility functions and structs.
//!
//! The utility objects in this submodule are not documented.
//! Use at your own risk.
#![allow(missing_docs)]

mod basic;
mod galois;
pub mod hash;
pub mod he_standard_params;
mod number_theory;
mod ntt;
pub(crate) mod polysmallmod;
pub mod rlwe;
mod random_generator;
mod timer;

// gather utilities in this module
pub use basic::*;
pub use ntt::*;
pub use number_theory::*;
pub use galois::*;
pub use random_generator::{BlakeRNGFactory, BlakeRNG, PRNGSeed};
pub use timer::Timer;

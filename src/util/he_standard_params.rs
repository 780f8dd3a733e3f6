//! Largest allowed bit counts for the full key modulus (ciphertext chain plus
//! the special prime) based on the HomomorphicEncryption.org security
//! standard, for secrets sampled from a ternary {-1, 0, 1} distribution.

/// Ternary secret; 128 bits classical security
pub fn he_standard_params_128_tc(poly_modulus_degree: usize) -> usize {
    match poly_modulus_degree {
         1024 =>  27,
         2048 =>  54,
         4096 => 109,
         8192 => 218,
        16384 => 438,
        32768 => 881,
            _ => 0
    }
}

/// Standard deviation of the RLWE error distribution.
pub const HE_HE_STANDARD_PARAMS_ERROR_STD_DEV: f64 = 3.2;

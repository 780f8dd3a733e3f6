use std::cmp::Ordering;

use crate::{
    util,
    SecurityLevel
};

/// Represent an integer modulus of up to 61 bits.
///
/// The primes of the ciphertext modulus chain and the special key-switching
/// prime are represented by instances of Modulus. Reductions go through
/// native 128-bit arithmetic.
#[derive(Debug, Eq, Clone, Copy, Default)]
pub struct Modulus {
    value: u64,
    bit_count: usize,
    is_prime: bool,
}

impl Ord for Modulus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl PartialOrd for Modulus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Modulus {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Modulus {

    /// Create a new Modulus instance with the given value.
    pub fn new(value: u64) -> Self {
        if value == 0 {
            return Modulus::default();
        }
        if (value >> util::HE_MOD_BIT_COUNT_MAX != 0) || (value == 1) {
            panic!("[Invalid argument] Value can be at most 61-bit and cannot be 1.");
        }
        Modulus {
            value,
            bit_count: util::get_significant_bit_count(value),
            is_prime: util::is_prime_u64(value),
        }
    }

    /// Reduce a word modulo the modulus.
    #[inline]
    pub fn reduce(&self, value: u64) -> u64 {
        value % self.value
    }

    /// Reduce a double word modulo the modulus.
    #[inline]
    pub fn reduce_u128(&self, value: u128) -> u64 {
        (value % self.value as u128) as u64
    }

    /// Reduce a signed word modulo the modulus.
    #[inline]
    pub fn reduce_i64(&self, value: i64) -> u64 {
        util::reduce_i64(value, self.value)
    }

    /// Reduce a signed double word modulo the modulus.
    #[inline]
    pub fn reduce_i128(&self, value: i128) -> u64 {
        util::reduce_i128(value, self.value)
    }

    /// The [u64] value.
    pub fn value(&self) -> u64 {self.value}
    /// Is the value a prime number?
    pub fn is_prime(&self) -> bool {self.is_prime}
    /// Is the value zero?
    pub fn is_zero(&self) -> bool {self.value == 0}
    /// How many bits are there in the modulus?
    pub fn bit_count(&self) -> usize {self.bit_count}

}

impl std::fmt::Display for Modulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Modulus ({})", self.value)
    }
}

/// This class contains static methods for creating a coefficient modulus easily.
///
/// The default value [SecurityLevel::Tc128] is checked against the
/// HomomorphicEncryption.org table when constructing a context; tests use
/// [SecurityLevel::None] to run on small rings.
pub struct CoeffModulus;

impl CoeffModulus {

    /// Returns the largest bit-length of the coefficient modulus, i.e., bit-length
    /// of the product of the primes in the coefficient modulus, that guarantees
    /// a given security level when using a given poly_modulus_degree.
    pub fn max_bit_count(poly_modulus_degree: usize, sec_level: SecurityLevel) -> usize {
        match sec_level {
            SecurityLevel::None => i32::MAX as usize,
            SecurityLevel::Tc128 => util::he_standard_params::he_standard_params_128_tc(poly_modulus_degree),
        }
    }

    /// Returns distinct primes congruent to 1 modulo 2*poly_modulus_degree with
    /// bit-lengths as given in `bit_sizes` (at most 61 bits).
    pub fn create(poly_modulus_degree: usize, bit_sizes: Vec<usize>) -> Vec<Modulus> {
        if !(util::HE_POLY_MOD_DEGREE_MIN..=util::HE_POLY_MOD_DEGREE_MAX).contains(&poly_modulus_degree) ||
            util::get_power_of_two(poly_modulus_degree as u64) < 0
        {
            panic!("[Invalid argument] Poly modulus degree is invalid.");
        }
        if bit_sizes.is_empty() {
            panic!("[Invalid argument] Bit sizes are empty.");
        }
        if bit_sizes.iter().any(|&b| !(util::HE_MOD_BIT_COUNT_MIN..=util::HE_MOD_BIT_COUNT_MAX).contains(&b)) {
            panic!("[Invalid argument] Bit sizes invalid.");
        }
        let mut count_table = std::collections::HashMap::new();
        for size in &bit_sizes {
            *count_table.entry(*size).or_insert(0usize) += 1;
        }
        let factor = 2 * poly_modulus_degree as u64;
        let mut prime_table = std::collections::HashMap::new();
        for (k, v) in count_table {
            prime_table.insert(k, util::get_primes(factor, k, v));
        }
        bit_sizes.into_iter()
            .map(|size| prime_table.get_mut(&size).and_then(|r| r.pop())
                .expect("[Logic error] Prime table exhausted."))
            .collect()
    }

    /// The modulus chain used by CKKS in this crate.
    ///
    /// Returns `(q_0, ..., q_levels)` and the special prime `p`. The base prime
    /// `q_0` has `log_q0` bits, the rescaling primes alternate around
    /// `2^log_scale`, and `p` has `log_special` bits.
    pub fn ckks_chain(poly_modulus_degree: usize, log_q0: usize, levels: usize, log_scale: usize, log_special: usize) -> (Vec<Modulus>, Modulus) {
        let factor = 2 * poly_modulus_degree as u64;
        let edge = Self::create(poly_modulus_degree, vec![log_q0, log_special]);
        let exclude = edge.iter().map(|m| m.value()).collect::<Vec<_>>();
        let mut chain = vec![edge[0]];
        chain.extend(util::get_primes_around(factor, log_scale, levels, &exclude));
        (chain, edge[1])
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_create_modulus() {
        let m = Modulus::new(0);
        assert!(m.is_zero());
        assert_eq!(m.bit_count(), 0);
        let m = Modulus::new(3);
        assert_eq!(m.bit_count(), 2);
        assert!(m.is_prime());
        let m = Modulus::new(0xF00000F00000F);
        assert_eq!(m.bit_count(), 52);
        assert!(!m.is_prime());
        let m = Modulus::new(0xF00000F000079);
        assert!(m.is_prime());
        assert_eq!(m.reduce_i64(-1), 0xF00000F000078);
        assert_eq!(m.reduce_u128(0xF00000F000079u128 * 5 + 7), 7);
    }

    #[test]
    pub fn test_compare_modulus() {
        let sm0 = Modulus::default();
        let sm2 = Modulus::new(2);
        let sm5 = Modulus::new(5);
        assert!(sm0 == sm0);
        assert!(sm5 >= sm2);
        assert!(sm5 != sm2);
        assert!(sm5 > sm2);
    }

    #[test]
    pub fn test_custom() {
        let cm = CoeffModulus::create(2, vec![3]);
        assert_eq!(1, cm.len());
        assert_eq!(5, cm[0].value());

        let cm = CoeffModulus::create(2, vec![3, 5, 4, 5]);
        assert_eq!(4, cm.len());
        assert_eq!(5, cm[0].value());
        assert_eq!(17, cm[1].value());
        assert_eq!(13, cm[2].value());
        assert_eq!(29, cm[3].value());

        let cm = CoeffModulus::create(32, vec![30, 40, 30, 30, 40]);
        assert_eq!(5, cm.len());
        for (m, bits) in cm.iter().zip([30, 40, 30, 30, 40]) {
            assert_eq!(bits, util::get_significant_bit_count(m.value()));
            assert_eq!(1, m.value() % 64);
        }
    }

    #[test]
    pub fn test_ckks_chain() {
        let (chain, special) = CoeffModulus::ckks_chain(1024, 60, 4, 40, 61);
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[0].bit_count(), 60);
        assert_eq!(special.bit_count(), 61);
        for q in &chain[1..] {
            assert!(q.is_prime());
            assert_eq!(q.value() % 2048, 1);
        }
        let mut values = chain.iter().map(|m| m.value()).collect::<Vec<_>>();
        values.push(special.value());
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 6);
    }
}

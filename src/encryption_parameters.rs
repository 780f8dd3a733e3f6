use serde::{Serialize, Deserialize};

use crate::{CoeffModulus, Modulus, util::{self, PRNGSeed}};

/// A set of parameters defining the CKKS scheme.
///
/// It includes the polynomial modulus degree, the ciphertext modulus chain
/// `q_0, ..., q_L` and the special prime `p` used for key switching.
/// Level `l` of a ciphertext means it lives modulo `q_0 * ... * q_l`.
#[derive(Default, Clone, Debug)]
pub struct EncryptionParameters {
    poly_modulus_degree: usize,
    coeff_modulus: Vec<Modulus>,
    special_modulus: Modulus,
    random_seed: Option<PRNGSeed>,
}

impl EncryptionParameters {

    /// Polynomial modulus degree N. The scheme operates on Z_q\[X\]/(X^N + 1).
    pub fn poly_modulus_degree(&self) -> usize {self.poly_modulus_degree}

    /// Ciphertext moduli chain `q_0, ..., q_L`.
    pub fn coeff_modulus(&self) -> &[Modulus] {&self.coeff_modulus}

    /// The special key-switching prime `p`.
    pub fn special_modulus(&self) -> &Modulus {&self.special_modulus}

    /// Seed of the context random generator, when runs must replay.
    pub fn random_seed(&self) -> Option<&PRNGSeed> {self.random_seed.as_ref()}

    /// Highest ciphertext level `L`.
    pub fn max_level(&self) -> usize {self.coeff_modulus.len().saturating_sub(1)}

    /// Creates an empty set; fill it with the setters.
    /// ```rust
    /// # use cellcnn_he::*;
    /// let degree = 1024;
    /// let (chain, special) = CoeffModulus::ckks_chain(degree, 60, 3, 40, 61);
    /// let parms = EncryptionParameters::new()
    ///     .set_poly_modulus_degree(degree)
    ///     .set_coeff_modulus(&chain)
    ///     .set_special_modulus(special);
    /// let context = HeContext::new(parms, SecurityLevel::None).unwrap();
    /// assert_eq!(context.max_level(), 3);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used throughout the crate: a `log_q0`-bit base prime,
    /// `levels` rescaling primes around `2^log_scale` and a `log_special`-bit
    /// special prime.
    pub fn ckks(log_n: usize, levels: usize, log_scale: usize, log_q0: usize, log_special: usize) -> Self {
        let degree = 1 << log_n;
        let (chain, special) = CoeffModulus::ckks_chain(degree, log_q0, levels, log_scale, log_special);
        Self::new()
            .set_poly_modulus_degree(degree)
            .set_coeff_modulus(&chain)
            .set_special_modulus(special)
    }

    pub fn set_poly_modulus_degree(mut self, poly_modulus_degree: usize) -> Self {
        self.poly_modulus_degree = poly_modulus_degree;
        self
    }

    pub fn set_coeff_modulus(mut self, coeff_modulus: &[Modulus]) -> Self {
        self.coeff_modulus = coeff_modulus.to_vec();
        self
    }

    pub fn set_special_modulus(mut self, special_modulus: Modulus) -> Self {
        self.special_modulus = special_modulus;
        self
    }

    pub fn set_random_seed(mut self, seed: Option<PRNGSeed>) -> Self {
        self.random_seed = seed;
        self
    }

    /// All moduli a key lives under: the chain followed by `p`.
    pub fn key_modulus(&self) -> Vec<Modulus> {
        let mut moduli = self.coeff_modulus.clone();
        moduli.push(self.special_modulus);
        moduli
    }

    /// Check the set, returning the first defect found.
    pub fn validate(&self, sec_level: SecurityLevel) -> ErrorType {
        let degree = self.poly_modulus_degree;
        if !(util::HE_POLY_MOD_DEGREE_MIN..=util::HE_POLY_MOD_DEGREE_MAX).contains(&degree) {
            return ErrorType::InvalidPolyModulusDegree;
        }
        if util::get_power_of_two(degree as u64) < 0 {
            return ErrorType::InvalidPolyModulusDegreeNonPowerOfTwo;
        }
        if self.coeff_modulus.is_empty() || self.special_modulus.is_zero() {
            return ErrorType::InvalidCoeffModulusSize;
        }
        let key_modulus = self.key_modulus();
        let factor = 2 * degree as u64;
        let mut total_bits = 0;
        for (i, m) in key_modulus.iter().enumerate() {
            if m.bit_count() > util::HE_MOD_BIT_COUNT_MAX || m.bit_count() < util::HE_MOD_BIT_COUNT_MIN {
                return ErrorType::InvalidCoeffModulusBitCount;
            }
            if !m.is_prime() || m.value() % factor != 1 {
                return ErrorType::InvalidCoeffModulusNoNTT;
            }
            if key_modulus[..i].contains(m) {
                return ErrorType::InvalidCoeffModulusNotDistinct;
            }
            total_bits += m.bit_count();
        }
        if total_bits > CoeffModulus::max_bit_count(degree, sec_level) {
            return ErrorType::InvalidParametersInsecure;
        }
        ErrorType::Success
    }

}

/// Represents a standard security level according to the HomomorphicEncryption.org
/// security standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// No security guaranteed. Small test rings use this.
    None,
    /// 128-bit classical security.
    #[default]
    Tc128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorType {
    /** valid */
    Success,

    /** coeff_modulus or the special prime is missing */
    InvalidCoeffModulusSize,

    /** a prime's bit count is not bounded by HE_MOD_BIT_COUNT_MIN(MAX) */
    InvalidCoeffModulusBitCount,

    /** a modulus is not a prime congruent to 1 modulo (2 * poly_modulus_degree) */
    InvalidCoeffModulusNoNTT,

    /** two moduli coincide */
    InvalidCoeffModulusNotDistinct,

    /** poly_modulus_degree is not bounded by HE_POLY_MOD_DEGREE_MIN(MAX) */
    InvalidPolyModulusDegree,

    /** poly_modulus_degree is not a power of two */
    InvalidPolyModulusDegreeNonPowerOfTwo,

    /** parameters are not compliant with HomomorphicEncryption.org security standard */
    InvalidParametersInsecure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let parms = EncryptionParameters::ckks(10, 3, 40, 60, 61);
        assert_eq!(parms.max_level(), 3);
        assert_eq!(parms.key_modulus().len(), 5);
        assert_eq!(parms.validate(SecurityLevel::None), ErrorType::Success);
        assert_eq!(parms.validate(SecurityLevel::Tc128), ErrorType::InvalidParametersInsecure);

        let bad = parms.clone().set_poly_modulus_degree(1000);
        assert_eq!(bad.validate(SecurityLevel::None), ErrorType::InvalidPolyModulusDegreeNonPowerOfTwo);

        let duplicated = parms.clone().set_special_modulus(parms.coeff_modulus()[1]);
        assert_eq!(duplicated.validate(SecurityLevel::None), ErrorType::InvalidCoeffModulusNotDistinct);

        let no_ntt = parms.set_special_modulus(Modulus::new(17));
        assert_eq!(no_ntt.validate(SecurityLevel::None), ErrorType::InvalidCoeffModulusNoNTT);
    }

    #[test]
    fn test_security_level_serde() {
        #[derive(Deserialize)]
        struct Wrapper { level: SecurityLevel }
        let w: Wrapper = toml::from_str("level = \"tc128\"").unwrap();
        assert_eq!(w.level, SecurityLevel::Tc128);
        let w: Wrapper = toml::from_str("level = \"none\"").unwrap();
        assert_eq!(w.level, SecurityLevel::None);
    }
}

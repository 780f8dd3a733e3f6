use std::collections::{HashMap, BTreeSet};
use std::sync::Arc;

use crate::{
    Ciphertext,
    HeContext,
    polymod,
    util::{rlwe, BlakeRNG},
};

/// Class to store a secret key.
///
/// The ternary secret is kept in NTT form modulo every key modulus
/// `q_0, ..., q_L, p`; the first `l + 1` components serve level `l`.
#[derive(Clone, Default)]
pub struct SecretKey {
    data: Vec<u64>,
}

impl SecretKey {

    pub fn new(data: Vec<u64>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u64] {&self.data}
    pub fn data_mut(&mut self) -> &mut Vec<u64> {&mut self.data}

    /// Components `q_0, ..., q_level`.
    pub fn data_at(&self, context: &HeContext, level: usize) -> &[u64] {
        &self.data[..(level + 1) * context.poly_modulus_degree()]
    }

}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// Class to store a public key: an encryption of zero at the top level.
#[derive(Clone, Default, Debug)]
pub struct PublicKey(Ciphertext);

impl PublicKey {

    pub fn new(pk: Ciphertext) -> Self {
        Self(pk)
    }

    pub fn as_ciphertext(&self) -> &Ciphertext {&self.0}
    pub fn as_ciphertext_mut(&mut self) -> &mut Ciphertext {&mut self.0}

}

impl From<Ciphertext> for PublicKey {
    fn from(value: Ciphertext) -> Self {
        Self(value)
    }
}

/**
Key-switching key from a secret `s'` to the secret `s`.

Digit `j` holds `(b_j, a_j)` over all key moduli with
`b_j = -a_j s + e_j + [j == i] p s'` in component `i`. A ciphertext part at
level `l` is decomposed into its residues modulo `q_0..q_l`, each residue
multiplies its digit, and the special prime is divided out at the end.
*/
#[derive(Clone, Default, Debug)]
pub struct KSwitchKey {
    digits: Vec<Vec<u64>>,
}

impl KSwitchKey {

    /// Digit polynomials stored as `b_j || a_j`.
    pub fn from_members(digits: Vec<Vec<u64>>) -> Self {
        Self { digits }
    }

    pub fn digit_count(&self) -> usize {self.digits.len()}

    fn half(&self) -> usize {self.digits.first().map(|x| x.len() / 2).unwrap_or(0)}

    pub fn b(&self, digit: usize) -> &[u64] {&self.digits[digit][..self.half()]}
    pub fn a(&self, digit: usize) -> &[u64] {&self.digits[digit][self.half()..]}

    pub fn data(&self) -> &[Vec<u64>] {&self.digits}
    pub fn data_mut(&mut self) -> &mut Vec<Vec<u64>> {&mut self.digits}

    /// Component-wise sum, used when aggregating party shares.
    pub fn add_inplace(&mut self, other: &KSwitchKey, context: &HeContext) {
        assert_eq!(self.digit_count(), other.digit_count(), "[Invalid argument] Digit count mismatch.");
        let n = context.poly_modulus_degree();
        let mut moduli = context.key_modulus().to_vec();
        moduli.extend_from_slice(context.key_modulus());
        for (x, y) in self.digits.iter_mut().zip(other.digits.iter()) {
            polymod::add_inplace_p(x, y, n, &moduli);
        }
    }

}

/// Key switching key from `s^2` to `s`.
#[derive(Clone, Default, Debug)]
pub struct RelinKeys {
    key: KSwitchKey,
}

impl RelinKeys {

    pub fn new(key: KSwitchKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &KSwitchKey {&self.key}

}

/// Key switching keys from `sigma_g(s)` to `s`, indexed by Galois element.
#[derive(Clone, Default, Debug)]
pub struct GaloisKeys {
    keys: HashMap<usize, KSwitchKey>,
}

impl GaloisKeys {

    pub fn new() -> Self {Self::default()}

    pub fn has_key(&self, galois_elt: usize) -> bool {
        self.keys.contains_key(&galois_elt)
    }

    pub fn key(&self, galois_elt: usize) -> &KSwitchKey {
        match self.keys.get(&galois_elt) {
            Some(key) => key,
            None => panic!("[Invalid argument] Galois key not present for element {}.", galois_elt),
        }
    }

    pub fn insert(&mut self, galois_elt: usize, key: KSwitchKey) {
        self.keys.insert(galois_elt, key);
    }

    /// Sorted Galois elements present.
    pub fn galois_elts(&self) -> Vec<usize> {
        self.keys.keys().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn len(&self) -> usize {self.keys.len()}
    pub fn is_empty(&self) -> bool {self.keys.is_empty()}

}

/// Generates matching secret key, public key, relinearization and Galois keys.
pub struct KeyGenerator {
    context: Arc<HeContext>,
    secret_key: SecretKey,
}

impl KeyGenerator {

    /// Create a new KeyGenerator with a fresh ternary secret.
    pub fn new(context: Arc<HeContext>) -> Self {
        let mut rng = context.create_random_generator();
        let secret_key = Self::sample_secret(&context, &mut rng);
        Self { context, secret_key }
    }

    pub fn context(&self) -> &Arc<HeContext> {&self.context}
    pub fn secret_key(&self) -> &SecretKey {&self.secret_key}

    pub(crate) fn sample_secret(context: &HeContext, rng: &mut BlakeRNG) -> SecretKey {
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let mut data = vec![0; n * moduli.len()];
        rlwe::sample::ternary(rng, n, moduli, &mut data);
        polymod::ntt_p(&mut data, n, context.key_ntt_tables());
        SecretKey::new(data)
    }

    /// Generates a new [PublicKey] corresponding to the secret key.
    pub fn create_public_key(&self) -> PublicKey {
        let mut pk = PublicKey::default();
        rlwe::encrypt_zero::symmetric(&self.secret_key, &self.context, self.context.max_level(), pk.as_ciphertext_mut());
        pk
    }

    /**
    Key switching key towards `new_key`, given in NTT form over the key moduli.
    The mask polynomials `a_j` are drawn from `a_prng`; shares of several
    parties built with the same `a_prng` seed add up to a key for the sum of
    their secrets.
    */
    pub fn generate_kswitch_key_with_a_prng(context: &HeContext, secret_key: &SecretKey, new_key: &[u64], a_prng: &mut BlakeRNG) -> KSwitchKey {
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let ntt_tables = context.key_ntt_tables();
        let len = n * moduli.len();
        let digit_count = context.max_level() + 1;
        let mut noise_prng = context.create_random_generator();

        let mut digits = Vec::with_capacity(digit_count);
        for j in 0..digit_count {
            let mut digit = vec![0; 2 * len];
            let (b, a) = digit.split_at_mut(len);
            rlwe::sample::uniform(a_prng, n, moduli, a);
            rlwe::sample::centered_binomial(&mut noise_prng, n, moduli, b);
            polymod::ntt_p(b, n, ntt_tables);
            let mut product = vec![0; len];
            polymod::dyadic_product_p(a, secret_key.data(), n, moduli, &mut product);
            polymod::sub_inplace_p(b, &product, n, moduli);

            // + p s' in component j only
            let p_mod_q = context.special_mod_q()[j];
            let mut scaled = vec![0; n];
            polymod::multiply_scalar(&new_key[j * n..(j + 1) * n], p_mod_q, &moduli[j], &mut scaled);
            polymod::add_inplace(&mut b[j * n..(j + 1) * n], &scaled, &moduli[j]);
            digits.push(digit);
        }
        KSwitchKey::from_members(digits)
    }

    pub fn create_keyswitching_key(&self, new_key: &SecretKey) -> KSwitchKey {
        let mut rng = self.context.create_random_generator();
        Self::generate_kswitch_key_with_a_prng(&self.context, &self.secret_key, new_key.data(), &mut rng)
    }

    /// Creates a [RelinKeys] object that can be used to relinearize ciphertexts.
    pub fn create_relin_keys(&self) -> RelinKeys {
        let n = self.context.poly_modulus_degree();
        let mut squared = vec![0; self.secret_key.data().len()];
        polymod::dyadic_product_p(self.secret_key.data(), self.secret_key.data(), n, self.context.key_modulus(), &mut squared);
        RelinKeys::new(self.create_keyswitching_key(&SecretKey::new(squared)))
    }

    /// `sigma_g(s)` in NTT form over the key moduli.
    pub fn rotated_secret(context: &HeContext, secret_key: &SecretKey, galois_elt: usize) -> Vec<u64> {
        let mut rotated = vec![0; secret_key.data().len()];
        context.galois_tool().apply_ntt_p(secret_key.data(), context.key_modulus_size(), galois_elt, &mut rotated);
        rotated
    }

    /// Creates a [GaloisKeys] object for the given Galois elements.
    pub fn create_galois_keys_from_elts(&self, galois_elts: &[usize]) -> GaloisKeys {
        let coeff_count = self.context.poly_modulus_degree();
        let mut galois_keys = GaloisKeys::new();
        for &galois_elt in galois_elts {
            if galois_elt % 2 == 0 || galois_elt >= (coeff_count << 1) {
                panic!("[Invalid argument] Invalid Galois element.");
            }
            if galois_keys.has_key(galois_elt) {
                continue;
            }
            let rotated = Self::rotated_secret(&self.context, &self.secret_key, galois_elt);
            let mut rng = self.context.create_random_generator();
            galois_keys.insert(galois_elt, Self::generate_kswitch_key_with_a_prng(&self.context, &self.secret_key, &rotated, &mut rng));
        }
        galois_keys
    }

    /// Creates a [GaloisKeys] object for the given rotation steps.
    pub fn create_galois_keys_from_steps(&self, steps: &[isize]) -> GaloisKeys {
        let elts = self.context.galois_tool().get_elts_from_steps(steps);
        self.create_galois_keys_from_elts(&elts)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{util, EncryptionParameters, SecurityLevel};

    /// Largest centered coefficient of `b_j + a_j s - [i == j] p s'` over all
    /// components; small for a well-formed key.
    fn kswitch_key_noise(context: &HeContext, key: &KSwitchKey, secret_key: &SecretKey, new_key: &[u64]) -> u64 {
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let mut worst = 0;
        for j in 0..key.digit_count() {
            let mut t = vec![0; n * moduli.len()];
            polymod::dyadic_product_p(key.a(j), secret_key.data(), n, moduli, &mut t);
            polymod::add_inplace_p(&mut t, key.b(j), n, moduli);
            let mut scaled = vec![0; n];
            polymod::multiply_scalar(&new_key[j * n..(j + 1) * n], context.special_mod_q()[j], &moduli[j], &mut scaled);
            polymod::sub_inplace(&mut t[j * n..(j + 1) * n], &scaled, &moduli[j]);
            polymod::intt_p(&mut t, n, context.key_ntt_tables());
            for (component, modulus) in t.chunks(n).zip(moduli.iter()) {
                worst = worst.max(polymod::infinity_norm(component, modulus));
            }
        }
        worst
    }

    fn context() -> Arc<HeContext> {
        HeContext::new(EncryptionParameters::ckks(5, 2, 30, 40, 41), SecurityLevel::None).unwrap()
    }

    #[test]
    fn test_secret_is_ternary() {
        let context = context();
        let keygen = KeyGenerator::new(context.clone());
        let n = context.poly_modulus_degree();
        let mut s = keygen.secret_key().data().to_vec();
        polymod::intt_p(&mut s, n, context.key_ntt_tables());
        for (component, modulus) in s.chunks(n).zip(context.key_modulus()) {
            assert!(polymod::infinity_norm(component, modulus) <= 1);
        }
        let first = s[..n].iter().map(|&x| util::center_u64(x, context.key_modulus()[0].value())).collect::<Vec<_>>();
        let last = s[3 * n..].iter().map(|&x| util::center_u64(x, context.special_modulus().value())).collect::<Vec<_>>();
        assert_eq!(first, last);
    }

    #[test]
    fn test_relin_and_galois_keys_are_well_formed() {
        let context = context();
        let keygen = KeyGenerator::new(context.clone());
        let n = context.poly_modulus_degree();

        let rlk = keygen.create_relin_keys();
        assert_eq!(rlk.key().digit_count(), 3);
        let mut squared = vec![0; keygen.secret_key().data().len()];
        polymod::dyadic_product_p(keygen.secret_key().data(), keygen.secret_key().data(), n, context.key_modulus(), &mut squared);
        assert!(kswitch_key_noise(&context, rlk.key(), keygen.secret_key(), &squared) <= 21);

        let gks = keygen.create_galois_keys_from_steps(&[1, -1, 1]);
        assert_eq!(gks.len(), 2);
        let elt = context.galois_tool().get_elt_from_step(1);
        assert!(gks.has_key(elt));
        let rotated = KeyGenerator::rotated_secret(&context, keygen.secret_key(), elt);
        assert!(kswitch_key_noise(&context, gks.key(elt), keygen.secret_key(), &rotated) <= 21);
        assert_eq!(gks.galois_elts().len(), 2);
    }

    #[test]
    #[should_panic(expected = "Galois key not present")]
    fn test_missing_galois_key_panics() {
        let gks = GaloisKeys::new();
        gks.key(5);
    }
}

use std::sync::Arc;

use crate::{
    EncryptionParameters,
    Modulus,
    SecurityLevel,
    encryption_parameters::ErrorType,
    util::{self, BlakeRNG, BlakeRNGFactory, GaloisTool, NTTTables},
    Error, Result,
};

/// Performs sanity checks (validation) and pre-computations for a given set
/// of encryption parameters.
///
/// All levels share the prefix of one modulus list `q_0, ..., q_L, p`, so a
/// ciphertext at level `l` uses the first `l + 1` components of every table
/// here and key-switching additionally uses the last one.
pub struct HeContext {
    parms: EncryptionParameters,
    security_level: SecurityLevel,
    coeff_count_power: usize,
    key_modulus: Vec<Modulus>,
    ntt_tables: Vec<NTTTables>,
    galois_tool: GaloisTool,
    /// `[l][i] = q_l^{-1} mod q_i` for `i < l`.
    inv_last_mod_q: Vec<Vec<u64>>,
    /// `p^{-1} mod q_i`.
    inv_special_mod_q: Vec<u64>,
    /// `p mod q_i`.
    special_mod_q: Vec<u64>,
    /// NTT of the monomial `X^{N/2}` over every key modulus.
    monomial_half: Vec<u64>,
    random_generator: BlakeRNGFactory,
}

impl HeContext {

    /// Validate the parameters and run the precomputations.
    pub fn new(parms: EncryptionParameters, sec_level: SecurityLevel) -> Result<Arc<Self>> {
        match parms.validate(sec_level) {
            ErrorType::Success => (),
            e => return Err(Error::Config(format!("encryption parameters rejected: {:?}", e))),
        }
        let degree = parms.poly_modulus_degree();
        let coeff_count_power = util::get_power_of_two(degree as u64) as usize;
        let key_modulus = parms.key_modulus();
        let ntt_tables = NTTTables::create_ntt_tables(coeff_count_power, &key_modulus)
            .map_err(Error::Config)?;

        let chain = parms.coeff_modulus();
        let mut inv_last_mod_q = Vec::with_capacity(chain.len());
        for l in 0..chain.len() {
            let mut row = Vec::with_capacity(l);
            for q in &chain[..l] {
                row.push(Self::invert(chain[l].value(), q)?);
            }
            inv_last_mod_q.push(row);
        }
        let special = parms.special_modulus();
        let inv_special_mod_q = chain.iter()
            .map(|q| Self::invert(special.value(), q))
            .collect::<Result<Vec<_>>>()?;
        let special_mod_q = chain.iter().map(|q| q.reduce(special.value())).collect();

        let mut monomial_half = vec![0; degree * key_modulus.len()];
        for (component, table) in monomial_half.chunks_mut(degree).zip(ntt_tables.iter()) {
            component[degree >> 1] = 1;
            table.ntt_negacyclic_harvey(component);
        }

        let random_generator = match parms.random_seed() {
            Some(seed) => BlakeRNGFactory::from_seed(*seed),
            None => BlakeRNGFactory::new(),
        };

        Ok(Arc::new(HeContext {
            security_level: sec_level,
            coeff_count_power,
            key_modulus,
            ntt_tables,
            galois_tool: GaloisTool::new(coeff_count_power),
            inv_last_mod_q,
            inv_special_mod_q,
            special_mod_q,
            monomial_half,
            random_generator,
            parms,
        }))
    }

    fn invert(value: u64, modulus: &Modulus) -> Result<u64> {
        let mut result = 0;
        if !util::try_invert_u64_mod(value, modulus, &mut result) {
            return Err(Error::Config(format!("{} is not invertible modulo {}", value, modulus.value())));
        }
        Ok(result)
    }

    pub fn parms(&self) -> &EncryptionParameters {&self.parms}
    pub fn security_level(&self) -> SecurityLevel {self.security_level}
    pub fn poly_modulus_degree(&self) -> usize {self.parms.poly_modulus_degree()}
    pub fn coeff_count_power(&self) -> usize {self.coeff_count_power}
    pub fn galois_tool(&self) -> &GaloisTool {&self.galois_tool}

    /// Number of complex slots, `N/2`.
    pub fn slot_count(&self) -> usize {self.poly_modulus_degree() >> 1}

    /// Highest level `L` of a fresh ciphertext.
    pub fn max_level(&self) -> usize {self.parms.max_level()}

    /// Ciphertext moduli `q_0, ..., q_level`.
    pub fn moduli_at(&self, level: usize) -> &[Modulus] {
        assert!(level <= self.max_level(), "[Invalid argument] Level out of range.");
        &self.key_modulus[..=level]
    }

    pub fn ntt_tables_at(&self, level: usize) -> &[NTTTables] {
        assert!(level <= self.max_level(), "[Invalid argument] Level out of range.");
        &self.ntt_tables[..=level]
    }

    /// Chain moduli followed by the special prime.
    pub fn key_modulus(&self) -> &[Modulus] {&self.key_modulus}
    pub fn key_ntt_tables(&self) -> &[NTTTables] {&self.ntt_tables}
    pub fn special_modulus(&self) -> &Modulus {&self.key_modulus[self.key_modulus.len() - 1]}
    pub fn special_ntt_tables(&self) -> &NTTTables {&self.ntt_tables[self.ntt_tables.len() - 1]}

    /// Number of components of a key polynomial, `L + 2`.
    pub fn key_modulus_size(&self) -> usize {self.key_modulus.len()}

    pub fn inv_last_mod_q(&self, level: usize) -> &[u64] {&self.inv_last_mod_q[level]}
    pub fn inv_special_mod_q(&self) -> &[u64] {&self.inv_special_mod_q}
    pub fn special_mod_q(&self) -> &[u64] {&self.special_mod_q}

    /// `X^{N/2}` in NTT form, restricted to `level`.
    pub fn monomial_half_at(&self, level: usize) -> &[u64] {
        &self.monomial_half[..(level + 1) * self.poly_modulus_degree()]
    }

    /// The prime removed by rescaling at `level`; plaintext multiplicands at
    /// that level are encoded with this scale.
    pub fn rescale_modulus(&self, level: usize) -> f64 {
        self.key_modulus[level].value() as f64
    }

    pub fn create_random_generator(&self) -> BlakeRNG {
        self.random_generator.get_rng()
    }

    pub fn is_deterministic(&self) -> bool {
        self.random_generator.is_deterministic()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::PRNGSeed;

    #[test]
    fn test_context_tables() {
        let parms = EncryptionParameters::ckks(4, 3, 30, 40, 41);
        let context = HeContext::new(parms, SecurityLevel::None).unwrap();
        assert_eq!(context.slot_count(), 8);
        assert_eq!(context.max_level(), 3);
        assert_eq!(context.key_modulus_size(), 5);
        assert_eq!(context.moduli_at(1).len(), 2);
        assert_eq!(context.special_modulus().bit_count(), 41);

        for l in 1..=3 {
            let q_l = context.moduli_at(l)[l];
            for (i, q) in context.moduli_at(l - 1).iter().enumerate() {
                let inv = context.inv_last_mod_q(l)[i];
                assert_eq!(util::multiply_u64_mod(q.reduce(q_l.value()), inv, q), 1);
            }
        }
        for (i, q) in context.moduli_at(3).iter().enumerate() {
            assert_eq!(util::multiply_u64_mod(context.special_mod_q()[i], context.inv_special_mod_q()[i], q), 1);
        }

        // X^{N/2} squared is -1
        let n = context.poly_modulus_degree();
        let x = context.monomial_half_at(0);
        let q = context.moduli_at(0)[0];
        for i in 0..n {
            assert_eq!(util::multiply_u64_mod(x[i], x[i], &q), q.value() - 1);
        }
    }

    #[test]
    fn test_context_rejects_insecure() {
        let parms = EncryptionParameters::ckks(10, 3, 40, 60, 61);
        assert!(matches!(HeContext::new(parms, SecurityLevel::Tc128), Err(Error::Config(_))));
    }

    #[test]
    fn test_deterministic_generator() {
        use rand::RngCore;
        let seed = PRNGSeed::from_u64(3);
        let a = HeContext::new(EncryptionParameters::ckks(4, 1, 30, 40, 41).set_random_seed(Some(seed)), SecurityLevel::None).unwrap();
        let b = HeContext::new(EncryptionParameters::ckks(4, 1, 30, 40, 41).set_random_seed(Some(seed)), SecurityLevel::None).unwrap();
        assert!(a.is_deterministic());
        assert_eq!(a.create_random_generator().next_u64(), b.create_random_generator().next_u64());
    }
}

use crate::{util, Modulus};

/// Precomputed tables for the negacyclic number theoretic transform
/// modulo one prime.
///
/// Powers of the primitive 2N-th root are stored in bit-reversed order, so
/// the forward transform writes the evaluation at `root^(2 * rev(k) + 1)`
/// into index `k`. The Galois permutation tables rely on this ordering.
#[derive(Clone, Default, Debug)]
pub struct NTTTables {
    root: u64,
    coeff_count_power: usize,
    coeff_count: usize,
    modulus: Modulus,
    inv_degree_modulo: u64,
    root_powers: Vec<u64>,
    inv_root_powers: Vec<u64>,
}

impl NTTTables {

    pub fn new(coeff_count_power: usize, modulus: &Modulus) -> Result<Self, &'static str> {
        let coeff_count = 1usize << coeff_count_power;
        let modulus = *modulus;
        let mut root: u64 = 0;
        if !util::try_minimal_primitive_root(2 * coeff_count as u64, &modulus, &mut root) {
            return Err("[Invalid argument] Invalid modulus.");
        }
        let mut inv_root: u64 = 0;
        if !util::try_invert_u64_mod(root, &modulus, &mut inv_root) {
            return Err("[Invalid argument] Invalid modulus, unable to invert.");
        }

        let mut root_powers = vec![0; coeff_count];
        let mut inv_root_powers = vec![0; coeff_count];
        let mut power = 1;
        let mut inv_power = 1;
        for i in 0..coeff_count {
            let index = util::reverse_bits_u64(i as u64, coeff_count_power) as usize;
            root_powers[index] = power;
            inv_root_powers[index] = inv_power;
            power = util::multiply_u64_mod(power, root, &modulus);
            inv_power = util::multiply_u64_mod(inv_power, inv_root, &modulus);
        }

        let mut inv_degree_modulo = 0;
        if !util::try_invert_u64_mod(coeff_count as u64, &modulus, &mut inv_degree_modulo) {
            return Err("[Invalid argument] Invalid modulus, unable to invert degree.");
        }

        Ok(NTTTables {
            root,
            coeff_count_power,
            coeff_count,
            modulus,
            inv_degree_modulo,
            root_powers,
            inv_root_powers,
        })
    }

    pub fn root(&self) -> u64 {self.root}
    pub fn get_root_powers(&self) -> &[u64] {&self.root_powers}
    pub fn get_inv_root_powers(&self) -> &[u64] {&self.inv_root_powers}
    pub fn modulus(&self) -> &Modulus {&self.modulus}
    pub fn coeff_count_power(&self) -> usize {self.coeff_count_power}
    pub fn coeff_count(&self) -> usize {self.coeff_count}

    pub fn create_ntt_tables(coeff_count_power: usize, moduli: &[Modulus]) -> Result<Vec<NTTTables>, String> {
        if moduli.is_empty() {
            return Err("[Invalid argument] Moduli is empty.".to_string());
        }
        moduli.iter()
            .map(|x| Self::new(coeff_count_power, x).map_err(|e| e.to_string()))
            .collect()
    }

    /// Forward transform, Cooley-Tukey butterflies over bit-reversed roots.
    pub fn ntt_negacyclic_harvey(&self, operand: &mut[u64]) {
        let q = self.modulus.value();
        let n = self.coeff_count;
        let mut t = n;
        let mut m = 1;
        while m < n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.root_powers[m + i];
                for j in j1..j1 + t {
                    let u = operand[j];
                    let v = util::multiply_u64_mod(operand[j + t], s, &self.modulus);
                    operand[j] = if u + v >= q {u + v - q} else {u + v};
                    operand[j + t] = if u >= v {u - v} else {u + q - v};
                }
            }
            m <<= 1;
        }
    }

    /// Inverse transform, Gentleman-Sande butterflies, includes the 1/N factor.
    pub fn inverse_ntt_negacyclic_harvey(&self, operand: &mut[u64]) {
        let q = self.modulus.value();
        let n = self.coeff_count;
        let mut t = 1;
        let mut m = n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.inv_root_powers[h + i];
                for j in j1..j1 + t {
                    let u = operand[j];
                    let v = operand[j + t];
                    operand[j] = if u + v >= q {u + v - q} else {u + v};
                    let diff = if u >= v {u - v} else {u + q - v};
                    operand[j + t] = util::multiply_u64_mod(diff, s, &self.modulus);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        operand.iter_mut().for_each(|x| {
            *x = util::multiply_u64_mod(*x, self.inv_degree_modulo, &self.modulus);
        });
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_ntt_basics() {
        let coeff_count_power = 1;
        let modulus = util::get_prime(2 << coeff_count_power, 60);
        let tables = NTTTables::new(coeff_count_power, &modulus).unwrap();
        assert_eq!(2, tables.coeff_count());
        assert_eq!(1, tables.coeff_count_power());

        let coeff_count_power = 10;
        let modulus = util::get_prime(2 << coeff_count_power, 40);
        let tables = NTTTables::new(coeff_count_power, &modulus).unwrap();
        assert_eq!(1024, tables.coeff_count());

        NTTTables::create_ntt_tables(
            coeff_count_power,
            &crate::CoeffModulus::create(1 << coeff_count_power, vec![20, 20, 20, 20, 20])
        ).unwrap().iter().for_each(|table| {
            assert_eq!(1024, table.coeff_count());
        });
    }

    #[test]
    fn test_ntt_primitive_roots() {
        let modulus = Modulus::new(0xffffffffffc0001);
        let tables = NTTTables::new(1, &modulus).unwrap();
        assert_eq!(1, tables.get_root_powers()[0]);
        assert_eq!(288794978602139552, tables.get_root_powers()[1]);
        let mut inv: u64 = 0;
        util::try_invert_u64_mod(288794978602139552, &modulus, &mut inv);
        assert_eq!(inv, tables.get_inv_root_powers()[1]);

        let tables = NTTTables::new(2, &modulus).unwrap();
        assert_eq!(288794978602139552, tables.get_root_powers()[1]);
        assert_eq!(178930308976060547, tables.get_root_powers()[2]);
        assert_eq!(748001537669050592, tables.get_root_powers()[3]);
    }

    #[test]
    fn test_negacyclic_ntt() {
        let modulus = Modulus::new(0xffffffffffc0001);
        let tables = NTTTables::new(1, &modulus).unwrap();

        let mut poly = [0, 0];
        tables.ntt_negacyclic_harvey(&mut poly);
        assert_eq!(poly, [0, 0]);

        let mut poly = [1, 0];
        tables.ntt_negacyclic_harvey(&mut poly);
        assert_eq!(poly, [1, 1]);

        let mut poly = [1, 1];
        tables.ntt_negacyclic_harvey(&mut poly);
        assert_eq!(poly, [288794978602139553, 864126526004445282]);
    }

    #[test]
    fn test_inverse_negacyclic_ntt() {
        const COEFF_COUNT_POWER: usize = 3;
        const N: usize = 1 << COEFF_COUNT_POWER;
        let modulus = Modulus::new(0xffffffffffc0001);
        let tables = NTTTables::new(COEFF_COUNT_POWER, &modulus).unwrap();

        let mut poly = [0; N];
        tables.inverse_ntt_negacyclic_harvey(&mut poly);
        assert_eq!(poly, [0; N]);

        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        for each in &mut poly {
            *each = modulus.reduce(rng.gen());
        }
        let copied = poly;

        tables.ntt_negacyclic_harvey(&mut poly);
        tables.inverse_ntt_negacyclic_harvey(&mut poly);
        assert_eq!(poly, copied);
    }

    #[test]
    fn test_ntt_is_negacyclic_product() {
        // (1 + X) * X^(N-1) = X^(N-1) + X^N = -1 + X^(N-1)
        let modulus = util::get_prime(16, 30);
        let tables = NTTTables::new(3, &modulus).unwrap();
        let q = modulus.value();
        let mut a = [1, 1, 0, 0, 0, 0, 0, 0];
        let mut b = [0, 0, 0, 0, 0, 0, 0, 1];
        tables.ntt_negacyclic_harvey(&mut a);
        tables.ntt_negacyclic_harvey(&mut b);
        let mut c = [0; 8];
        for i in 0..8 {
            c[i] = util::multiply_u64_mod(a[i], b[i], &modulus);
        }
        tables.inverse_ntt_negacyclic_harvey(&mut c);
        assert_eq!(c, [q - 1, 0, 0, 0, 0, 0, 0, 1]);
    }

}

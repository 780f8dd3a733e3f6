use std::sync::RwLock;

use crate::util;

/// Generator of the rotation subgroup of `(Z/2NZ)*` used by the slot encoding.
pub(crate) const GALOIS_GENERATOR: usize = 5;

pub struct GaloisTool {
    coeff_count_power: usize,
    coeff_count: usize,
    permutation_tables: RwLock<Vec<Vec<usize>>>,
}

impl GaloisTool {

    pub fn new(coeff_count_power: usize) -> Self {
        assert!(coeff_count_power as isize <= util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MAX as u64)
            && coeff_count_power as isize >= util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MIN as u64),
            "[Invalid argument] Coeff count power out of range.");
        GaloisTool {
            coeff_count_power,
            coeff_count: 1 << coeff_count_power,
            permutation_tables: RwLock::new(vec![vec![]; 1 << coeff_count_power]),
        }
    }

    pub fn generate_table_ntt(&self, galois_elt: usize) -> Vec<usize> {
        let coeff_count = self.coeff_count;
        let mut result = vec![0; coeff_count];
        let coeff_count_minus_one = coeff_count - 1;
        for i in coeff_count .. (coeff_count << 1) {
            let reversed = util::reverse_bits_u32(i as u32, self.coeff_count_power + 1);
            let index_raw = ((galois_elt as u64 * reversed as u64) >> 1) & coeff_count_minus_one as u64;
            result[i - coeff_count] = util::reverse_bits_u32(index_raw as u32, self.coeff_count_power) as usize;
        }
        result
    }

    /// Number of slots of a CKKS plaintext.
    pub fn slot_count(&self) -> usize {
        self.coeff_count >> 1
    }

    /// Normalize a signed rotation step into `[0, slots)`.
    pub fn normalize_step(&self, step: isize) -> usize {
        let slots = self.slot_count() as isize;
        step.rem_euclid(slots) as usize
    }

    /**
    Compute the Galois element for a left rotation of the slots by `step`:
    slot `t + step` moves to slot `t`.
    */
    pub fn get_elt_from_step(&self, step: isize) -> usize {
        let m = self.coeff_count << 1;
        let step = self.normalize_step(step);
        let mut galois_elt = 1;
        for _ in 0..step {
            galois_elt = (galois_elt * GALOIS_GENERATOR) & (m - 1);
        }
        galois_elt
    }

    /// The Galois element of complex conjugation of the slots.
    pub fn get_elt_conjugate(&self) -> usize {
        (self.coeff_count << 1) - 1
    }

    pub fn get_elts_from_steps(&self, steps: &[isize]) -> Vec<usize> {
        steps.iter().map(|&x| self.get_elt_from_step(x)).collect()
    }

    /**
    Compute the index in the range of 0 to (coeff_count_ - 1) of a given Galois element.
    */
    pub fn get_index_from_elt(galois_elt: usize) -> usize {
        assert!(galois_elt & 1 > 0, "[Invalid argument] Galois elt is not invalid");
        (galois_elt - 1) >> 1
    }

    /// Apply the automorphism to a coefficient-form polynomial modulo one prime.
    pub fn apply(&self, operand: &[u64], galois_elt: usize, modulus: u64, result: &mut [u64]) {
        let coeff_count_minus_one = self.coeff_count - 1;
        let mut index_raw = 0;
        for value in operand.iter().take(self.coeff_count) {
            let index = index_raw & coeff_count_minus_one;
            let mut result_value = *value;
            if ((index_raw >> self.coeff_count_power) & 1) > 0 && result_value != 0 {
                result_value = modulus - result_value;
            }
            result[index] = result_value;
            index_raw += galois_elt;
        }
    }

    /// Apply the automorphism to one NTT-form component.
    #[inline]
    pub fn apply_ntt(&self, operand: &[u64], galois_elt: usize, result: &mut [u64]) {
        let index = Self::get_index_from_elt(galois_elt);

        let need_to_generate = {
            let tables = self.permutation_tables.read().unwrap_or_else(|e| e.into_inner());
            (*tables)[index].is_empty()
        };
        if need_to_generate {
            let mut tables = self.permutation_tables.write().unwrap_or_else(|e| e.into_inner());
            (*tables)[index] = self.generate_table_ntt(galois_elt);
        }

        let reader = self.permutation_tables.read().unwrap_or_else(|e| e.into_inner());
        let table = &(*reader)[index];
        assert_eq!(result.len(), self.coeff_count);
        result.iter_mut().zip(table.iter()).for_each(|(r, &t)| *r = operand[t]);
    }

    /// Apply the automorphism to `component_count` consecutive NTT-form components.
    #[inline]
    pub fn apply_ntt_p(&self, poly: &[u64], component_count: usize, galois_elt: usize, result: &mut [u64]) {
        let degree = self.coeff_count;
        for i in 0..component_count {
            let range = i * degree..(i + 1) * degree;
            self.apply_ntt(&poly[range.clone()], galois_elt, &mut result[range]);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::NTTTables;

    #[test]
    fn test_get_elts() {
        let tool = GaloisTool::new(3);
        assert_eq!(4, tool.slot_count());
        assert_eq!(1, tool.get_elt_from_step(0));
        assert_eq!(5, tool.get_elt_from_step(1));
        assert_eq!(9, tool.get_elt_from_step(2));
        assert_eq!(13, tool.get_elt_from_step(3));
        assert_eq!(13, tool.get_elt_from_step(-1));
        assert_eq!(15, tool.get_elt_conjugate());
        assert_eq!(tool.get_elts_from_steps(&[1, -3, 6]), vec![5, 5, 9]);
        assert_eq!(7, GaloisTool::get_index_from_elt(15));
        assert_eq!(2, GaloisTool::get_index_from_elt(5));
    }

    #[test]
    fn test_apply_galois() {
        let tool = GaloisTool::new(3);
        let input = vec![0, 1, 2, 3, 4, 5, 6, 7];
        let mut output = vec![0; 8];
        tool.apply(&input, 3, 17, &mut output);
        assert_eq!(output, vec![0, 14, 6, 1, 13, 7, 2, 12]);
    }

    #[test]
    fn test_apply_galois_ntt_matches_coefficient_form() {
        let modulus = crate::util::get_prime(16, 30);
        let tables = NTTTables::new(3, &modulus).unwrap();
        let tool = GaloisTool::new(3);
        let input = vec![3, 1, 4, 1, 5, 9, 2, 6];
        for elt in [3, 5, 9, 15] {
            let mut expected = vec![0; 8];
            tool.apply(&input, elt, modulus.value(), &mut expected);
            tables.ntt_negacyclic_harvey(&mut expected);

            let mut transformed = input.clone();
            tables.ntt_negacyclic_harvey(&mut transformed);
            let mut output = vec![0; 8];
            tool.apply_ntt(&transformed, elt, &mut output);
            assert_eq!(output, expected);
        }
    }

}

use std::sync::Arc;

use crate::{
    util::{self, GALOIS_GENERATOR},
    HeContext,
    Plaintext,
    polymod,
};
use num_complex::Complex;

/// Provides functionality for encoding vectors of complex or real numbers into
/// plaintext polynomials to be encrypted and computed on using the CKKS scheme.
///
/// If the polynomial modulus degree is N, then CKKSEncoder converts vectors of
/// N/2 complex numbers into plaintext elements. Homomorphic operations
/// performed on such encrypted vectors are applied coefficient (slot-)wise,
/// enabling powerful SIMD functionality for computations that are
/// vectorizable. Slot `j` is the evaluation of the message polynomial at
/// `zeta^(5^j)` with `zeta = exp(i pi / N)`, so the automorphism
/// `X -> X^(5^k)` rotates the slots left by `k` and `X -> X^(2N-1)` conjugates
/// them.
///
/// The embedding is computed by the special FFT over the rotation group; the
/// inverse runs first on encoding, the forward one on decoding.
pub struct CKKSEncoder {
    context: Arc<HeContext>,
    slots: usize,
    rot_group: Vec<usize>,
    ksi_pows: Vec<Complex<f64>>,
}

impl CKKSEncoder {

    pub fn new(context: Arc<HeContext>) -> Self {
        let coeff_count = context.poly_modulus_degree();
        let slots = coeff_count >> 1;
        let m = coeff_count << 1;

        let mut rot_group = Vec::with_capacity(slots);
        let mut five_pow = 1;
        for _ in 0..slots {
            rot_group.push(five_pow);
            five_pow = (five_pow * GALOIS_GENERATOR) & (m - 1);
        }

        let mut ksi_pows = Vec::with_capacity(m + 1);
        for j in 0..m {
            let angle = 2.0 * std::f64::consts::PI * j as f64 / m as f64;
            ksi_pows.push(Complex::new(angle.cos(), angle.sin()));
        }
        ksi_pows.push(ksi_pows[0]);

        CKKSEncoder { context, slots, rot_group, ksi_pows }
    }

    /// Number of complex slots, `N/2`.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn context(&self) -> &Arc<HeContext> {
        &self.context
    }

    fn bit_reverse(values: &mut [Complex<f64>]) {
        let logn = util::get_power_of_two(values.len() as u64) as usize;
        for i in 0..values.len() {
            let j = util::reverse_bits_u64(i as u64, logn) as usize;
            if i < j {
                values.swap(i, j);
            }
        }
    }

    fn fft_special_inv(&self, values: &mut [Complex<f64>]) {
        let size = values.len();
        let m = self.context.poly_modulus_degree() << 1;
        let mut len = size;
        while len >= 2 {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (lenq - (self.rot_group[j] % lenq)) * (m / lenq);
                    let u = values[i + j] + values[i + j + lenh];
                    let v = (values[i + j] - values[i + j + lenh]) * self.ksi_pows[idx];
                    values[i + j] = u;
                    values[i + j + lenh] = v;
                }
            }
            len >>= 1;
        }
        Self::bit_reverse(values);
        let inv = 1.0 / size as f64;
        values.iter_mut().for_each(|x| *x *= inv);
    }

    fn fft_special(&self, values: &mut [Complex<f64>]) {
        let size = values.len();
        let m = self.context.poly_modulus_degree() << 1;
        Self::bit_reverse(values);
        let mut len = 2;
        while len <= size {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (self.rot_group[j] % lenq) * (m / lenq);
                    let u = values[i + j];
                    let v = values[i + j + lenh] * self.ksi_pows[idx];
                    values[i + j] = u + v;
                    values[i + j + lenh] = u - v;
                }
            }
            len <<= 1;
        }
    }

    /// Spread signed integer coefficients over the moduli of `level` and
    /// transform them to NTT form.
    fn set_coefficients(&self, coefficients: &[i128], level: usize, destination: &mut Plaintext) {
        let coeff_count = self.context.poly_modulus_degree();
        let moduli = self.context.moduli_at(level);
        let ntt_tables = self.context.ntt_tables_at(level);
        for (j, modulus) in moduli.iter().enumerate() {
            let component = destination.component_mut(j);
            component.iter_mut().zip(coefficients.iter())
                .for_each(|(c, &v)| *c = modulus.reduce_i128(v));
        }
        polymod::ntt_p(destination.data_mut(), coeff_count, ntt_tables);
    }

    fn to_integer(value: f64) -> i128 {
        assert!(value.is_finite(), "[Invalid argument] Encoded value is not finite.");
        value.round() as i128
    }

    /// Encode up to `N/2` complex values at `level` and `scale`. Missing slots are zero.
    pub fn encode_c64_array(&self, values: &[Complex<f64>], level: usize, scale: f64, destination: &mut Plaintext) {
        assert!(values.len() <= self.slots, "[Invalid argument] Too many values to encode.");
        assert!(scale > 0.0, "[Invalid argument] Scale must be positive.");
        let coeff_count = self.context.poly_modulus_degree();
        let mut conj_values = vec![Complex::new(0.0, 0.0); self.slots];
        conj_values[..values.len()].copy_from_slice(values);
        self.fft_special_inv(&mut conj_values);

        let mut coefficients = vec![0i128; coeff_count];
        for (i, value) in conj_values.iter().enumerate() {
            coefficients[i] = Self::to_integer(value.re * scale);
            coefficients[i + self.slots] = Self::to_integer(value.im * scale);
        }

        destination.resize(&self.context, level);
        destination.set_scale(scale);
        self.set_coefficients(&coefficients, level, destination);
    }

    pub fn encode_c64_array_new(&self, values: &[Complex<f64>], level: usize, scale: f64) -> Plaintext {
        let mut destination = Plaintext::new();
        self.encode_c64_array(values, level, scale, &mut destination);
        destination
    }

    pub fn encode_f64_array(&self, values: &[f64], level: usize, scale: f64, destination: &mut Plaintext) {
        let values = values.iter().map(|&x| Complex::new(x, 0.0)).collect::<Vec<_>>();
        self.encode_c64_array(&values, level, scale, destination);
    }

    pub fn encode_f64_array_new(&self, values: &[f64], level: usize, scale: f64) -> Plaintext {
        let mut destination = Plaintext::new();
        self.encode_f64_array(values, level, scale, &mut destination);
        destination
    }

    /// Encode `value` into every slot. The plaintext is the constant polynomial.
    pub fn encode_f64_single(&self, value: f64, level: usize, scale: f64, destination: &mut Plaintext) {
        let mut coefficients = vec![0i128; self.context.poly_modulus_degree()];
        coefficients[0] = Self::to_integer(value * scale);
        destination.resize(&self.context, level);
        destination.set_scale(scale);
        self.set_coefficients(&coefficients, level, destination);
    }

    pub fn encode_f64_single_new(&self, value: f64, level: usize, scale: f64) -> Plaintext {
        let mut destination = Plaintext::new();
        self.encode_f64_single(value, level, scale, &mut destination);
        destination
    }

    /// Decode all `N/2` slots. Only the residues modulo `q_0` are used, so the
    /// encoded magnitude times the scale must stay below `q_0 / 2`.
    pub fn decode(&self, plain: &Plaintext, destination: &mut Vec<Complex<f64>>) {
        let coeff_count = self.context.poly_modulus_degree();
        let modulus = self.context.moduli_at(0)[0].value();
        let mut component = plain.component(0).to_vec();
        self.context.ntt_tables_at(0)[0].inverse_ntt_negacyclic_harvey(&mut component);

        let inv_scale = 1.0 / plain.scale();
        destination.clear();
        destination.extend((0..self.slots).map(|i| {
            let re = util::center_u64(component[i], modulus) as f64;
            let im = util::center_u64(component[i + self.slots], modulus) as f64;
            Complex::new(re * inv_scale, im * inv_scale)
        }));
        debug_assert_eq!(coeff_count, 2 * destination.len());
        self.fft_special(destination);
    }

    pub fn decode_new(&self, plain: &Plaintext) -> Vec<Complex<f64>> {
        let mut destination = Vec::with_capacity(self.slots);
        self.decode(plain, &mut destination);
        destination
    }

    /// Real parts of the decoded slots.
    pub fn decode_real_new(&self, plain: &Plaintext) -> Vec<f64> {
        self.decode_new(plain).into_iter().map(|x| x.re).collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncryptionParameters, SecurityLevel};
    use rand::{Rng, SeedableRng};

    fn encoder(log_n: usize) -> CKKSEncoder {
        let context = HeContext::new(EncryptionParameters::ckks(log_n, 3, 40, 60, 61), SecurityLevel::None).unwrap();
        CKKSEncoder::new(context)
    }

    #[test]
    fn test_vector() {
        let encoder = encoder(6);
        let slots = encoder.slot_count();
        assert_eq!(slots, 32);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let values = (0..slots)
            .map(|_| Complex::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)))
            .collect::<Vec<_>>();
        for level in [0, 3] {
            let plain = encoder.encode_c64_array_new(&values, level, 2f64.powi(40));
            assert_eq!(plain.level(), level);
            let decoded = encoder.decode_new(&plain);
            for (a, b) in values.iter().zip(decoded.iter()) {
                assert!((a - b).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn test_partial_and_real() {
        let encoder = encoder(4);
        let plain = encoder.encode_f64_array_new(&[1.5, -2.0], 1, 2f64.powi(30));
        let decoded = encoder.decode_real_new(&plain);
        approx::assert_abs_diff_eq!(decoded[0], 1.5, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(decoded[1], -2.0, epsilon = 1e-6);
        for x in &decoded[2..] {
            approx::assert_abs_diff_eq!(*x, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_single() {
        let encoder = encoder(4);
        let plain = encoder.encode_f64_single_new(-3.25, 2, 2f64.powi(35));
        let decoded = encoder.decode_new(&plain);
        for x in decoded {
            approx::assert_abs_diff_eq!(x.re, -3.25, epsilon = 1e-8);
            approx::assert_abs_diff_eq!(x.im, 0.0, epsilon = 1e-8);
        }
        // A constant polynomial has equal NTT values everywhere
        let c = plain.component(1);
        assert!(c.iter().all(|&x| x == c[0]));
    }

    #[test]
    fn test_monomial_half_is_imaginary_unit() {
        let encoder = encoder(4);
        let context = encoder.context().clone();
        let mut plain = Plaintext::zero(&context, 0, 1.0);
        plain.data_mut().copy_from_slice(context.monomial_half_at(0));
        for x in encoder.decode_new(&plain) {
            approx::assert_abs_diff_eq!(x.re, 0.0, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(x.im, 1.0, epsilon = 1e-9);
        }
    }
}

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::{
    util::{self, NTTTables},
    Ciphertext, Plaintext,
    HeContext, Modulus,
    polymod, KSwitchKey, RelinKeys, GaloisKeys,
    Error, Result,
};

/// Relative tolerance on the scales of additive operands.
pub const SCALE_RELATIVE_TOLERANCE: f64 = 1.0 / 1024.0;

/// Provides operations on [Ciphertext] objects.
///
/// All ciphertexts and plaintexts are kept in NTT form. Arithmetic passes
/// through the encryption to the packed slots: additions and products act
/// slot-wise, rotations shift the slots cyclically and conjugation conjugates
/// them.
///
/// ## Levels and scales
/// Additive operands must share their level and have scales that agree within
/// [SCALE_RELATIVE_TOLERANCE]; the result keeps the scale of the first
/// operand. Products multiply the scales. [Evaluator::rescale_to_next_inplace]
/// divides by the last prime of the ciphertext and drops one level, and
/// [Evaluator::drop_to_level_inplace] discards primes without touching the
/// scale.
///
/// ## Key switching
/// Relinearization and rotations use a per-prime decomposition with one
/// special prime. [Evaluator::rotate_hoisted] decomposes once and reuses the
/// decomposition for many rotations of the same ciphertext.
///
/// Operand mismatches are programming errors and panic; use
/// [Evaluator::try_add_inplace] for operands coming from other parties.
pub struct Evaluator {
    context: Arc<HeContext>,
    galois_trace: Mutex<Option<BTreeSet<usize>>>,
}

impl Evaluator {

    pub fn new(context: Arc<HeContext>) -> Self {
        Self { context, galois_trace: Mutex::new(None) }
    }

    pub fn context(&self) -> &Arc<HeContext> {
        &self.context
    }

    /// Start recording the Galois elements used by rotations.
    pub fn enable_galois_trace(&self) {
        let mut trace = self.galois_trace.lock().unwrap_or_else(|e| e.into_inner());
        *trace = Some(BTreeSet::new());
    }

    /// Galois elements used since [Evaluator::enable_galois_trace], sorted.
    pub fn galois_trace(&self) -> Vec<usize> {
        let trace = self.galois_trace.lock().unwrap_or_else(|e| e.into_inner());
        trace.as_ref().map(|x| x.iter().copied().collect()).unwrap_or_default()
    }

    fn record_galois(&self, galois_elt: usize) {
        let mut trace = self.galois_trace.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = trace.as_mut() {
            set.insert(galois_elt);
        }
    }

    #[inline]
    fn degree(&self) -> usize {
        self.context.poly_modulus_degree()
    }

    pub fn scales_match(scale1: f64, scale2: f64) -> bool {
        (scale1 - scale2).abs() <= SCALE_RELATIVE_TOLERANCE * scale1.abs().max(scale2.abs())
    }

    fn check_additive(ciphertext1: &Ciphertext, level: usize, scale: f64) {
        if ciphertext1.level() != level {
            panic!("[Invalid argument] Operands are at different levels ({} and {}).", ciphertext1.level(), level);
        }
        if !Self::scales_match(ciphertext1.scale(), scale) {
            panic!("[Invalid argument] Scale mismatch ({} and {}).", ciphertext1.scale(), scale);
        }
    }

    fn ensure_size(&self, ciphertext: &mut Ciphertext, size: usize) {
        if ciphertext.size() >= size {return;}
        let mut data = ciphertext.data().to_vec();
        let poly_len = self.degree() * ciphertext.coeff_modulus_size();
        data.resize(size * poly_len, 0);
        *ciphertext = Ciphertext::from_members(size, ciphertext.level(), self.degree(), data, ciphertext.scale());
    }

    pub fn negate_inplace(&self, ciphertext: &mut Ciphertext) {
        let n = self.degree();
        let moduli = self.context.moduli_at(ciphertext.level());
        for i in 0..ciphertext.size() {
            polymod::negate_inplace_p(ciphertext.poly_mut(i), n, moduli);
        }
    }

    pub fn negate_new(&self, ciphertext: &Ciphertext) -> Ciphertext {
        let mut destination = ciphertext.clone();
        self.negate_inplace(&mut destination);
        destination
    }

    pub fn add_inplace(&self, ciphertext1: &mut Ciphertext, ciphertext2: &Ciphertext) {
        Self::check_additive(ciphertext1, ciphertext2.level(), ciphertext2.scale());
        self.ensure_size(ciphertext1, ciphertext2.size());
        let n = self.degree();
        let moduli = self.context.moduli_at(ciphertext1.level());
        for i in 0..ciphertext2.size() {
            polymod::add_inplace_p(ciphertext1.poly_mut(i), ciphertext2.poly(i), n, moduli);
        }
    }

    pub fn add_new(&self, ciphertext1: &Ciphertext, ciphertext2: &Ciphertext) -> Ciphertext {
        let mut destination = ciphertext1.clone();
        self.add_inplace(&mut destination, ciphertext2);
        destination
    }

    /// Checked addition for operands received from other parties.
    pub fn try_add_inplace(&self, ciphertext1: &mut Ciphertext, ciphertext2: &Ciphertext) -> Result<()> {
        if ciphertext1.level() != ciphertext2.level() || ciphertext1.size() != ciphertext2.size()
            || ciphertext1.poly_modulus_degree() != ciphertext2.poly_modulus_degree()
        {
            return Err(Error::ShareMismatch(format!(
                "operands at (level {}, size {}) and (level {}, size {})",
                ciphertext1.level(), ciphertext1.size(), ciphertext2.level(), ciphertext2.size()
            )));
        }
        if !Self::scales_match(ciphertext1.scale(), ciphertext2.scale()) {
            return Err(Error::ScaleMismatch { left: ciphertext1.scale(), right: ciphertext2.scale() });
        }
        self.add_inplace(ciphertext1, ciphertext2);
        Ok(())
    }

    pub fn sub_inplace(&self, ciphertext1: &mut Ciphertext, ciphertext2: &Ciphertext) {
        Self::check_additive(ciphertext1, ciphertext2.level(), ciphertext2.scale());
        self.ensure_size(ciphertext1, ciphertext2.size());
        let n = self.degree();
        let moduli = self.context.moduli_at(ciphertext1.level());
        for i in 0..ciphertext2.size() {
            polymod::sub_inplace_p(ciphertext1.poly_mut(i), ciphertext2.poly(i), n, moduli);
        }
    }

    pub fn sub_new(&self, ciphertext1: &Ciphertext, ciphertext2: &Ciphertext) -> Ciphertext {
        let mut destination = ciphertext1.clone();
        self.sub_inplace(&mut destination, ciphertext2);
        destination
    }

    fn plain_prefix<'a>(&self, plain: &'a Plaintext, level: usize) -> &'a [u64] {
        assert!(plain.level() >= level, "[Invalid argument] Plaintext level is below the ciphertext level.");
        &plain.data()[..(level + 1) * self.degree()]
    }

    pub fn add_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        Self::check_additive(encrypted, encrypted.level(), plain.scale());
        let n = self.degree();
        let level = encrypted.level();
        polymod::add_inplace_p(encrypted.poly_mut(0), self.plain_prefix(plain, level), n, self.context.moduli_at(level));
    }

    pub fn add_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.add_plain_inplace(&mut destination, plain);
        destination
    }

    pub fn sub_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        Self::check_additive(encrypted, encrypted.level(), plain.scale());
        let n = self.degree();
        let level = encrypted.level();
        polymod::sub_inplace_p(encrypted.poly_mut(0), self.plain_prefix(plain, level), n, self.context.moduli_at(level));
    }

    pub fn sub_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.sub_plain_inplace(&mut destination, plain);
        destination
    }

    /// Slot-wise product with a plaintext; scales multiply.
    pub fn multiply_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        let n = self.degree();
        let level = encrypted.level();
        let moduli = self.context.moduli_at(level);
        let plain_data = self.plain_prefix(plain, level);
        for i in 0..encrypted.size() {
            polymod::dyadic_product_inplace_p(encrypted.poly_mut(i), plain_data, n, moduli);
        }
        encrypted.set_scale(encrypted.scale() * plain.scale());
    }

    pub fn multiply_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.multiply_plain_inplace(&mut destination, plain);
        destination
    }

    /// Multiply every slot by the real `value` encoded at `scale`.
    pub fn multiply_const_with_scale_inplace(&self, encrypted: &mut Ciphertext, value: f64, scale: f64) {
        assert!(value.is_finite(), "[Invalid argument] Constant is not finite.");
        let integer = (value * scale).round() as i128;
        let level = encrypted.level();
        let n = self.degree();
        let moduli = self.context.moduli_at(level);
        for i in 0..encrypted.size() {
            let poly = encrypted.poly_mut(i);
            for (component, modulus) in poly.chunks_mut(n).zip(moduli.iter()) {
                polymod::multiply_scalar_inplace(component, modulus.reduce_i128(integer), modulus);
            }
        }
        encrypted.set_scale(encrypted.scale() * scale);
    }

    /// Multiply every slot by `value`, encoded at the prime the next rescale removes.
    pub fn multiply_const_inplace(&self, encrypted: &mut Ciphertext, value: f64) {
        let scale = self.context.rescale_modulus(encrypted.level());
        self.multiply_const_with_scale_inplace(encrypted, value, scale);
    }

    pub fn multiply_const_new(&self, encrypted: &Ciphertext, value: f64) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.multiply_const_inplace(&mut destination, value);
        destination
    }

    /// Add `value` to every slot at the ciphertext scale.
    pub fn add_const_inplace(&self, encrypted: &mut Ciphertext, value: f64) {
        let integer = (value * encrypted.scale()).round() as i128;
        let level = encrypted.level();
        let n = self.degree();
        let moduli = self.context.moduli_at(level).to_vec();
        let c0 = encrypted.poly_mut(0);
        for (component, modulus) in c0.chunks_mut(n).zip(moduli.iter()) {
            let r = modulus.reduce_i128(integer);
            let q = modulus.value();
            component.iter_mut().for_each(|x| {
                let s = *x + r;
                *x = if s >= q {s - q} else {s};
            });
        }
    }

    /// Tensor product of two size-2 ciphertexts at the same level; the result has size 3.
    pub fn multiply_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        if encrypted1.level() != encrypted2.level() {
            panic!("[Invalid argument] Operands are at different levels ({} and {}).", encrypted1.level(), encrypted2.level());
        }
        if encrypted1.size() != 2 || encrypted2.size() != 2 {
            panic!("[Invalid argument] Multiplication expects relinearized operands.");
        }
        let level = encrypted1.level();
        let n = self.degree();
        let moduli = self.context.moduli_at(level);
        let len = n * moduli.len();

        let mut data = vec![0; 3 * len];
        {
            let (d0, rest) = data.split_at_mut(len);
            let (d1, d2) = rest.split_at_mut(len);
            polymod::dyadic_product_p(encrypted1.poly(0), encrypted2.poly(0), n, moduli, d0);
            polymod::dyadic_product_p(encrypted1.poly(0), encrypted2.poly(1), n, moduli, d1);
            polymod::dyadic_product_accumulate_p(encrypted1.poly(1), encrypted2.poly(0), n, moduli, d1);
            polymod::dyadic_product_p(encrypted1.poly(1), encrypted2.poly(1), n, moduli, d2);
        }
        let scale = encrypted1.scale() * encrypted2.scale();
        *encrypted1 = Ciphertext::from_members(3, level, n, data, scale);
    }

    pub fn multiply_new(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted1.clone();
        self.multiply_inplace(&mut destination, encrypted2);
        destination
    }

    /// Multiply the slots by the imaginary unit, exactly, via the monomial `X^{N/2}`.
    pub fn multiply_by_i_inplace(&self, encrypted: &mut Ciphertext) {
        let n = self.degree();
        let level = encrypted.level();
        let moduli = self.context.moduli_at(level);
        let monomial = self.context.monomial_half_at(level);
        for i in 0..encrypted.size() {
            polymod::dyadic_product_inplace_p(encrypted.poly_mut(i), monomial, n, moduli);
        }
    }

    pub fn multiply_by_i_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.multiply_by_i_inplace(&mut destination);
        destination
    }

    /// Divide by the last prime `q_l` and drop to level `l - 1`.
    pub fn rescale_to_next_inplace(&self, encrypted: &mut Ciphertext) {
        let level = encrypted.level();
        if level == 0 {
            panic!("[Logic error] End of modulus switching chain reached.");
        }
        let n = self.degree();
        let moduli = self.context.moduli_at(level);
        let tables = self.context.ntt_tables_at(level);
        let inv_last = self.context.inv_last_mod_q(level);
        let last = &moduli[level];

        let new_len = n * level;
        let mut data = Vec::with_capacity(encrypted.size() * new_len);
        for i in 0..encrypted.size() {
            let poly = encrypted.poly(i);
            let mut last_component = poly[level * n..].to_vec();
            tables[level].inverse_ntt_negacyclic_harvey(&mut last_component);
            let centered = last_component.iter().map(|&x| util::center_u64(x, last.value())).collect::<Vec<_>>();
            let mut result = poly[..new_len].to_vec();
            for (j, component) in result.chunks_mut(n).enumerate() {
                let mut t = centered.iter().map(|&x| moduli[j].reduce_i64(x)).collect::<Vec<_>>();
                tables[j].ntt_negacyclic_harvey(&mut t);
                polymod::sub_inplace(component, &t, &moduli[j]);
                polymod::multiply_scalar_inplace(component, inv_last[j], &moduli[j]);
            }
            data.extend(result);
        }
        let scale = encrypted.scale() / last.value() as f64;
        *encrypted = Ciphertext::from_members(encrypted.size(), level - 1, n, data, scale);
    }

    pub fn rescale_to_next_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.rescale_to_next_inplace(&mut destination);
        destination
    }

    /// Discard the primes above `level`; the scale is unchanged.
    pub fn drop_to_level_inplace(&self, encrypted: &mut Ciphertext, level: usize) {
        encrypted.drop_to_level(level);
    }

    pub fn drop_to_level_new(&self, encrypted: &Ciphertext, level: usize) -> Ciphertext {
        let mut destination = encrypted.clone();
        destination.drop_to_level(level);
        destination
    }

    /// Components of the key-switching basis at `level`: `q_0..q_level, p`.
    fn active(&self, index: usize, level: usize) -> (&Modulus, &NTTTables) {
        if index <= level {
            (&self.context.key_modulus()[index], &self.context.key_ntt_tables()[index])
        } else {
            (self.context.special_modulus(), self.context.special_ntt_tables())
        }
    }

    /// Component of a key polynomial matching active component `index`.
    fn key_component(&self, index: usize, level: usize) -> usize {
        if index <= level {index} else {self.context.key_modulus_size() - 1}
    }

    /// Per-prime digits of `poly` (NTT form at `level`), each lifted to
    /// `q_0..q_level, p` in NTT form.
    fn decompose(&self, poly: &[u64], level: usize) -> Vec<Vec<u64>> {
        let n = self.degree();
        let count = level + 2;
        let mut digits = Vec::with_capacity(level + 1);
        for j in 0..=level {
            let (q_j, table_j) = self.active(j, level);
            let mut residue = poly[j * n..(j + 1) * n].to_vec();
            table_j.inverse_ntt_negacyclic_harvey(&mut residue);
            let centered = residue.iter().map(|&x| util::center_u64(x, q_j.value())).collect::<Vec<_>>();
            let mut digit = vec![0; count * n];
            for (k, component) in digit.chunks_mut(n).enumerate() {
                if k == j {
                    component.copy_from_slice(&poly[j * n..(j + 1) * n]);
                    continue;
                }
                let (modulus, table) = self.active(k, level);
                component.iter_mut().zip(centered.iter()).for_each(|(c, &v)| *c = modulus.reduce_i64(v));
                table.ntt_negacyclic_harvey(component);
            }
            digits.push(digit);
        }
        digits
    }

    /// Divide an accumulator over `q_0..q_level, p` by `p`, rounding.
    fn mod_down(&self, accumulator: &[u64], level: usize) -> Vec<u64> {
        let n = self.degree();
        let special = self.context.special_modulus();
        let mut last = accumulator[(level + 1) * n..(level + 2) * n].to_vec();
        self.context.special_ntt_tables().inverse_ntt_negacyclic_harvey(&mut last);
        let centered = last.iter().map(|&x| util::center_u64(x, special.value())).collect::<Vec<_>>();
        let inv_special = self.context.inv_special_mod_q();

        let mut result = accumulator[..(level + 1) * n].to_vec();
        for (i, component) in result.chunks_mut(n).enumerate() {
            let (modulus, table) = self.active(i, level);
            let mut t = centered.iter().map(|&x| modulus.reduce_i64(x)).collect::<Vec<_>>();
            table.ntt_negacyclic_harvey(&mut t);
            polymod::sub_inplace(component, &t, modulus);
            polymod::multiply_scalar_inplace(component, inv_special[i], modulus);
        }
        result
    }

    /// `(sum_j d_j b_j, sum_j d_j a_j) / p` at `level`.
    fn key_inner_product(&self, digits: &[Vec<u64>], key: &KSwitchKey, level: usize) -> (Vec<u64>, Vec<u64>) {
        let n = self.degree();
        let count = level + 2;
        assert!(key.digit_count() > level, "[Invalid argument] Key switching key has too few digits.");
        let mut acc0 = vec![0; count * n];
        let mut acc1 = vec![0; count * n];
        for (j, digit) in digits.iter().enumerate() {
            let (b, a) = (key.b(j), key.a(j));
            for k in 0..count {
                let (modulus, _) = self.active(k, level);
                let kk = self.key_component(k, level);
                let range = k * n..(k + 1) * n;
                let key_range = kk * n..(kk + 1) * n;
                polymod::dyadic_product_accumulate_p(&digit[range.clone()], &b[key_range.clone()], n, std::slice::from_ref(modulus), &mut acc0[range.clone()]);
                polymod::dyadic_product_accumulate_p(&digit[range.clone()], &a[key_range], n, std::slice::from_ref(modulus), &mut acc1[range]);
            }
        }
        (self.mod_down(&acc0, level), self.mod_down(&acc1, level))
    }

    fn switch_key(&self, poly: &[u64], level: usize, key: &KSwitchKey) -> (Vec<u64>, Vec<u64>) {
        let digits = self.decompose(poly, level);
        self.key_inner_product(&digits, key, level)
    }

    /// Bring a size-3 ciphertext back to size 2.
    pub fn relinearize_inplace(&self, encrypted: &mut Ciphertext, relin_keys: &RelinKeys) {
        if encrypted.size() == 2 {return;}
        assert_eq!(encrypted.size(), 3, "[Invalid argument] Relinearization supports size 3 only.");
        let level = encrypted.level();
        let n = self.degree();
        let moduli = self.context.moduli_at(level);
        let (k0, k1) = self.switch_key(encrypted.poly(2), level, relin_keys.key());
        polymod::add_inplace_p(encrypted.poly_mut(0), &k0, n, moduli);
        polymod::add_inplace_p(encrypted.poly_mut(1), &k1, n, moduli);
        let data = encrypted.polys(0, 2).to_vec();
        *encrypted = Ciphertext::from_members(2, level, n, data, encrypted.scale());
    }

    pub fn relinearize_new(&self, encrypted: &Ciphertext, relin_keys: &RelinKeys) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.relinearize_inplace(&mut destination, relin_keys);
        destination
    }

    pub fn apply_galois_inplace(&self, encrypted: &mut Ciphertext, galois_elt: usize, galois_keys: &GaloisKeys) {
        assert_eq!(encrypted.size(), 2, "[Invalid argument] Galois automorphisms need relinearized operands.");
        self.record_galois(galois_elt);
        let level = encrypted.level();
        let n = self.degree();
        let count = level + 1;
        let moduli = self.context.moduli_at(level);
        let galois_tool = self.context.galois_tool();
        let key = galois_keys.key(galois_elt);

        let mut c0 = vec![0; count * n];
        let mut c1 = vec![0; count * n];
        galois_tool.apply_ntt_p(encrypted.poly(0), count, galois_elt, &mut c0);
        galois_tool.apply_ntt_p(encrypted.poly(1), count, galois_elt, &mut c1);
        let (k0, k1) = self.switch_key(&c1, level, key);
        polymod::add_inplace_p(&mut c0, &k0, n, moduli);
        encrypted.poly_mut(0).copy_from_slice(&c0);
        encrypted.poly_mut(1).copy_from_slice(&k1);
    }

    /// Rotate the slots: slot `t + steps` moves to slot `t`.
    pub fn rotate_inplace(&self, encrypted: &mut Ciphertext, steps: isize, galois_keys: &GaloisKeys) {
        let galois_tool = self.context.galois_tool();
        if galois_tool.normalize_step(steps) == 0 {return;}
        let elt = galois_tool.get_elt_from_step(steps);
        self.apply_galois_inplace(encrypted, elt, galois_keys);
    }

    pub fn rotate_new(&self, encrypted: &Ciphertext, steps: isize, galois_keys: &GaloisKeys) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.rotate_inplace(&mut destination, steps, galois_keys);
        destination
    }

    /// Many rotations of one ciphertext sharing a single decomposition.
    pub fn rotate_hoisted(&self, encrypted: &Ciphertext, steps: &[isize], galois_keys: &GaloisKeys) -> Vec<Ciphertext> {
        assert_eq!(encrypted.size(), 2, "[Invalid argument] Galois automorphisms need relinearized operands.");
        let level = encrypted.level();
        let n = self.degree();
        let count = level + 1;
        let moduli = self.context.moduli_at(level);
        let galois_tool = self.context.galois_tool();
        let needs_keys = steps.iter().any(|&s| galois_tool.normalize_step(s) != 0);
        let digits = if needs_keys {self.decompose(encrypted.poly(1), level)} else {vec![]};

        steps.iter().map(|&step| {
            if galois_tool.normalize_step(step) == 0 {
                return encrypted.clone();
            }
            let elt = galois_tool.get_elt_from_step(step);
            self.record_galois(elt);
            let rotated_digits = digits.iter().map(|digit| {
                let mut rotated = vec![0; digit.len()];
                galois_tool.apply_ntt_p(digit, count + 1, elt, &mut rotated);
                rotated
            }).collect::<Vec<_>>();
            let (k0, k1) = self.key_inner_product(&rotated_digits, galois_keys.key(elt), level);
            let mut c0 = vec![0; count * n];
            galois_tool.apply_ntt_p(encrypted.poly(0), count, elt, &mut c0);
            polymod::add_inplace_p(&mut c0, &k0, n, moduli);
            let mut data = c0;
            data.extend(k1);
            Ciphertext::from_members(2, level, n, data, encrypted.scale())
        }).collect()
    }

    pub fn complex_conjugate_inplace(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) {
        let elt = self.context.galois_tool().get_elt_conjugate();
        self.apply_galois_inplace(encrypted, elt, galois_keys);
    }

    pub fn complex_conjugate_new(&self, encrypted: &Ciphertext, galois_keys: &GaloisKeys) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.complex_conjugate_inplace(&mut destination, galois_keys);
        destination
    }

    /**
    Rotation steps used by [Evaluator::inner_sum_log] with stride `batch` and
    count `n`, in the order they are applied.
    */
    pub fn inner_sum_steps(batch: isize, n: usize) -> Vec<isize> {
        let mut steps = vec![];
        let mut offset = 0usize;
        let mut i = 0;
        while (1usize << i) <= n {
            if n & (1 << i) != 0 {
                if offset != 0 {
                    steps.push(offset as isize * batch);
                }
                offset += 1 << i;
            }
            if (1usize << (i + 1)) <= n {
                steps.push((1isize << i) * batch);
            }
            i += 1;
        }
        steps
    }

    /**
    Sum of `n` rotations by multiples of `batch`:
    `sum_{t < n} rot(x, t * batch)`, in `O(log n)` rotations.
    With a negative `batch` this replicates a block of `|batch|` slots `n`
    times towards higher slots.
    */
    pub fn inner_sum_log(&self, encrypted: &Ciphertext, batch: isize, n: usize, galois_keys: &GaloisKeys) -> Ciphertext {
        assert!(n > 0, "[Invalid argument] Inner sum of zero terms.");
        let mut state = encrypted.clone();
        let mut result: Option<Ciphertext> = None;
        let mut offset = 0usize;
        let mut i = 0;
        while (1usize << i) <= n {
            if n & (1 << i) != 0 {
                let shifted = self.rotate_new(&state, offset as isize * batch, galois_keys);
                match result.as_mut() {
                    None => result = Some(shifted),
                    Some(r) => self.add_inplace(r, &shifted),
                }
                offset += 1 << i;
            }
            if (1usize << (i + 1)) <= n {
                let rotated = self.rotate_new(&state, (1isize << i) * batch, galois_keys);
                self.add_inplace(&mut state, &rotated);
            }
            i += 1;
        }
        result.unwrap_or(state)
    }

    /// `sum_{t < n} rot(x, -t * batch)`.
    pub fn replicate_log(&self, encrypted: &Ciphertext, batch: isize, n: usize, galois_keys: &GaloisKeys) -> Ciphertext {
        self.inner_sum_log(encrypted, -batch, n, galois_keys)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CKKSEncoder, Decryptor, EncryptionParameters, Encryptor, KeyGenerator, SecurityLevel};
    use num_complex::Complex;
    use rand::{Rng, SeedableRng};

    struct Setup {
        context: Arc<HeContext>,
        encoder: CKKSEncoder,
        encryptor: Encryptor,
        decryptor: Decryptor,
        evaluator: Evaluator,
        keygen: KeyGenerator,
    }

    const SCALE: f64 = 1099511627776.0; // 2^40

    fn setup() -> Setup {
        let context = HeContext::new(EncryptionParameters::ckks(6, 4, 40, 60, 61), SecurityLevel::None).unwrap();
        let keygen = KeyGenerator::new(context.clone());
        Setup {
            encoder: CKKSEncoder::new(context.clone()),
            encryptor: Encryptor::new(context.clone()).set_public_key(keygen.create_public_key()),
            decryptor: Decryptor::new(context.clone(), keygen.secret_key().clone()),
            evaluator: Evaluator::new(context.clone()),
            context,
            keygen,
        }
    }

    fn random_values(seed: u64, count: usize) -> Vec<Complex<f64>> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        (0..count).map(|_| Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))).collect()
    }

    impl Setup {
        fn encrypt(&self, values: &[Complex<f64>], level: usize) -> Ciphertext {
            self.encryptor.encrypt_new(&self.encoder.encode_c64_array_new(values, level, SCALE))
        }
        fn decrypt(&self, encrypted: &Ciphertext) -> Vec<Complex<f64>> {
            self.encoder.decode_new(&self.decryptor.decrypt_new(encrypted))
        }
    }

    fn assert_close(a: &[Complex<f64>], b: &[Complex<f64>], tolerance: f64) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!((x - y).norm() < tolerance, "slot {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_add_sub_negate() {
        let s = setup();
        let x = random_values(1, 32);
        let y = random_values(2, 32);
        let cx = s.encrypt(&x, 3);
        let cy = s.encrypt(&y, 3);
        let sum = s.evaluator.add_new(&cx, &cy);
        let expected = x.iter().zip(y.iter()).map(|(a, b)| a + b).collect::<Vec<_>>();
        assert_close(&s.decrypt(&sum), &expected, 1e-6);
        let diff = s.evaluator.sub_new(&cx, &cy);
        let expected = x.iter().zip(y.iter()).map(|(a, b)| a - b).collect::<Vec<_>>();
        assert_close(&s.decrypt(&diff), &expected, 1e-6);
        let neg = s.evaluator.negate_new(&cx);
        assert_close(&s.decrypt(&neg), &x.iter().map(|a| -a).collect::<Vec<_>>(), 1e-6);
        // commutativity
        assert_close(&s.decrypt(&s.evaluator.add_new(&cy, &cx)), &s.decrypt(&sum), 1e-6);
    }

    #[test]
    fn test_try_add_reports_mismatch() {
        let s = setup();
        let x = random_values(1, 32);
        let mut a = s.encrypt(&x, 3);
        let b = s.encrypt(&x, 2);
        assert!(matches!(s.evaluator.try_add_inplace(&mut a, &b), Err(Error::ShareMismatch(_))));
        let mut c = s.encryptor.encrypt_new(&s.encoder.encode_c64_array_new(&x, 2, SCALE * 2.0));
        assert!(matches!(s.evaluator.try_add_inplace(&mut c, &b), Err(Error::ScaleMismatch { .. })));
    }

    #[test]
    fn test_multiply_relin_rescale() {
        let s = setup();
        let rlk = s.keygen.create_relin_keys();
        let x = random_values(3, 32);
        let y = random_values(4, 32);
        let mut product = s.evaluator.multiply_new(&s.encrypt(&x, 4), &s.encrypt(&y, 4));
        assert_eq!(product.size(), 3);
        s.evaluator.relinearize_inplace(&mut product, &rlk);
        assert_eq!(product.size(), 2);
        s.evaluator.rescale_to_next_inplace(&mut product);
        assert_eq!(product.level(), 3);
        let expected = x.iter().zip(y.iter()).map(|(a, b)| a * b).collect::<Vec<_>>();
        assert_close(&s.decrypt(&product), &expected, 1e-5);
        assert!((product.scale() / SCALE - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_plain_and_const_ops() {
        let s = setup();
        let x = random_values(5, 32);
        let y = random_values(6, 32);
        let level = 3;
        let q = s.context.rescale_modulus(level);
        let mut c = s.encrypt(&x, level);
        s.evaluator.multiply_plain_inplace(&mut c, &s.encoder.encode_c64_array_new(&y, level, q));
        s.evaluator.rescale_to_next_inplace(&mut c);
        assert_eq!(c.scale(), SCALE);
        let expected = x.iter().zip(y.iter()).map(|(a, b)| a * b).collect::<Vec<_>>();
        assert_close(&s.decrypt(&c), &expected, 1e-6);

        s.evaluator.multiply_const_inplace(&mut c, -0.5);
        s.evaluator.rescale_to_next_inplace(&mut c);
        s.evaluator.add_const_inplace(&mut c, 0.25);
        let plain = s.encoder.encode_c64_array_new(&y, c.level(), c.scale());
        s.evaluator.add_plain_inplace(&mut c, &plain);
        s.evaluator.sub_plain_inplace(&mut c, &plain);
        let expected = expected.iter().map(|a| a * -0.5 + 0.25).collect::<Vec<_>>();
        assert_close(&s.decrypt(&c), &expected, 1e-6);
    }

    #[test]
    fn test_multiply_by_i_and_conjugate() {
        let s = setup();
        let x = random_values(7, 32);
        let c = s.encrypt(&x, 2);
        let ci = s.evaluator.multiply_by_i_new(&c);
        assert_close(&s.decrypt(&ci), &x.iter().map(|a| a * Complex::i()).collect::<Vec<_>>(), 1e-6);

        let gks = s.keygen.create_galois_keys_from_elts(&[s.context.galois_tool().get_elt_conjugate()]);
        let conj = s.evaluator.complex_conjugate_new(&c, &gks);
        assert_close(&s.decrypt(&conj), &x.iter().map(|a| a.conj()).collect::<Vec<_>>(), 1e-6);
    }

    #[test]
    fn test_rotations_and_trace() {
        let s = setup();
        let gks = s.keygen.create_galois_keys_from_steps(&[1, 3, -2]);
        let x = random_values(8, 32);
        let c = s.encrypt(&x, 4);
        s.evaluator.enable_galois_trace();
        for step in [1isize, 3, -2] {
            let rotated = s.evaluator.rotate_new(&c, step, &gks);
            let expected = (0..32).map(|t| x[(t as isize + step).rem_euclid(32) as usize]).collect::<Vec<_>>();
            assert_close(&s.decrypt(&rotated), &expected, 1e-6);
        }
        let hoisted = s.evaluator.rotate_hoisted(&c, &[0, 1, 3, -2, 32], &gks);
        for (rotated, step) in hoisted.iter().zip([0isize, 1, 3, -2, 32]) {
            let expected = (0..32).map(|t| x[(t as isize + step).rem_euclid(32) as usize]).collect::<Vec<_>>();
            assert_close(&s.decrypt(rotated), &expected, 1e-6);
        }
        let mut expected_elts = s.context.galois_tool().get_elts_from_steps(&[1, 3, -2]);
        expected_elts.sort();
        assert_eq!(s.evaluator.galois_trace(), expected_elts);
    }

    #[test]
    fn test_inner_sum_and_replicate() {
        let s = setup();
        let steps = Evaluator::inner_sum_steps(2, 5);
        assert_eq!(steps, vec![2, 4, 2]);
        assert_eq!(Evaluator::inner_sum_steps(-4, 3), vec![-4, -4]);
        assert!(Evaluator::inner_sum_steps(3, 1).is_empty());
        let mut all_steps = Evaluator::inner_sum_steps(2, 5);
        all_steps.extend(Evaluator::inner_sum_steps(-4, 3));
        let gks = s.keygen.create_galois_keys_from_steps(&all_steps);

        let x = random_values(9, 32);
        let c = s.encrypt(&x, 4);
        let summed = s.evaluator.inner_sum_log(&c, 2, 5, &gks);
        let expected = (0..32).map(|t| (0..5).map(|k| x[(t + 2 * k) % 32]).sum::<Complex<f64>>()).collect::<Vec<_>>();
        assert_close(&s.decrypt(&summed), &expected, 1e-5);

        let mut block = vec![Complex::new(0.0, 0.0); 32];
        block[..4].copy_from_slice(&x[..4]);
        let replicated = s.evaluator.replicate_log(&s.encrypt(&block, 4), 4, 3, &gks);
        let decrypted = s.decrypt(&replicated);
        for t in 0..12 {
            assert!((decrypted[t] - x[t % 4]).norm() < 1e-5);
        }
        for t in 12..32 {
            assert!(decrypted[t].norm() < 1e-5);
        }
    }

    #[test]
    #[should_panic(expected = "Scale mismatch")]
    fn test_scale_mismatch_panics() {
        let s = setup();
        let x = random_values(1, 4);
        let mut a = s.encrypt(&x, 2);
        let b = s.encryptor.encrypt_new(&s.encoder.encode_c64_array_new(&x, 2, SCALE * 1.5));
        s.evaluator.add_inplace(&mut a, &b);
    }
}

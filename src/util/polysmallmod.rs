//! Component-wise polynomial arithmetic over RNS moduli.
//!
//! A "component" is one residue polynomial of `degree` coefficients; the
//! `_p` variants walk a polynomial laid out as consecutive components, one
//! per modulus in `moduli`.

use crate::{Modulus, util::{self, NTTTables}};

#[cfg(test)]
#[inline]
fn components<'a>(poly: &'a [u64], degree: usize, moduli: &'a [Modulus]) -> impl Iterator<Item = (&'a [u64], &'a Modulus)> {
    poly.chunks(degree).zip(moduli.iter())
}

#[inline]
fn components_mut<'a>(poly: &'a mut [u64], degree: usize, moduli: &'a [Modulus]) -> impl Iterator<Item = (&'a mut [u64], &'a Modulus)> {
    poly.chunks_mut(degree).zip(moduli.iter())
}

pub fn negate_inplace(component: &mut [u64], modulus: &Modulus) {
    let q = modulus.value();
    component.iter_mut().for_each(|x| if *x != 0 {*x = q - *x});
}

pub fn negate_inplace_p(poly: &mut [u64], degree: usize, moduli: &[Modulus]) {
    components_mut(poly, degree, moduli).for_each(|(c, m)| negate_inplace(c, m));
}

pub fn add_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    let q = modulus.value();
    comp1.iter_mut().zip(comp2.iter()).for_each(|(a, &b)| {
        let s = *a + b;
        *a = if s >= q {s - q} else {s};
    });
}

pub fn add_inplace_p(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    components_mut(poly1, degree, moduli).zip(poly2.chunks(degree))
        .for_each(|((a, m), b)| add_inplace(a, b, m));
}

pub fn sub_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    let q = modulus.value();
    comp1.iter_mut().zip(comp2.iter()).for_each(|(a, &b)| {
        *a = if *a >= b {*a - b} else {*a + q - b};
    });
}

pub fn sub_inplace_p(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    components_mut(poly1, degree, moduli).zip(poly2.chunks(degree))
        .for_each(|((a, m), b)| sub_inplace(a, b, m));
}

pub fn multiply_scalar_inplace(comp: &mut [u64], scalar: u64, modulus: &Modulus) {
    let scalar = modulus.reduce(scalar);
    comp.iter_mut().for_each(|x| *x = util::multiply_u64_mod(*x, scalar, modulus));
}

pub fn multiply_scalar(comp: &[u64], scalar: u64, modulus: &Modulus, result: &mut [u64]) {
    result[..comp.len()].copy_from_slice(comp);
    multiply_scalar_inplace(&mut result[..comp.len()], scalar, modulus);
}

pub fn dyadic_product_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    comp1.iter_mut().zip(comp2.iter())
        .for_each(|(a, &b)| *a = util::multiply_u64_mod(*a, b, modulus));
}

pub fn dyadic_product_inplace_p(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    components_mut(poly1, degree, moduli).zip(poly2.chunks(degree))
        .for_each(|((a, m), b)| dyadic_product_inplace(a, b, m));
}

pub fn dyadic_product_p(poly1: &[u64], poly2: &[u64], degree: usize, moduli: &[Modulus], result: &mut [u64]) {
    let len = degree * moduli.len();
    result[..len].copy_from_slice(&poly1[..len]);
    dyadic_product_inplace_p(result, poly2, degree, moduli);
}

/// `acc += a * b` component-wise.
pub fn dyadic_product_accumulate_p(poly1: &[u64], poly2: &[u64], degree: usize, moduli: &[Modulus], acc: &mut [u64]) {
    for (((a, b), c), m) in poly1.chunks(degree).zip(poly2.chunks(degree)).zip(acc.chunks_mut(degree)).zip(moduli.iter()) {
        let q = m.value();
        for i in 0..degree {
            let s = util::multiply_u64_mod(a[i], b[i], m) + c[i];
            c[i] = if s >= q {s - q} else {s};
        }
    }
}

pub fn ntt_p(poly: &mut [u64], degree: usize, tables: &[NTTTables]) {
    poly.chunks_mut(degree).zip(tables.iter())
        .for_each(|(c, t)| t.ntt_negacyclic_harvey(c));
}

#[cfg(test)]
pub fn intt_p(poly: &mut [u64], degree: usize, tables: &[NTTTables]) {
    poly.chunks_mut(degree).zip(tables.iter())
        .for_each(|(c, t)| t.inverse_ntt_negacyclic_harvey(c));
}

/// Spread centered signed coefficients over every modulus.
#[cfg(test)]
pub fn from_signed_p(values: &[i64], moduli: &[Modulus], result: &mut [u64]) {
    let degree = values.len();
    components_mut(result, degree, moduli).for_each(|(c, m)| {
        c.iter_mut().zip(values.iter()).for_each(|(r, &v)| *r = m.reduce_i64(v));
    });
}

/// Largest absolute centered coefficient of the first component.
#[cfg(test)]
pub fn infinity_norm(component: &[u64], modulus: &Modulus) -> u64 {
    component.iter()
        .map(|&x| util::center_u64(x, modulus.value()).unsigned_abs())
        .max().unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn is_reduced_p(poly: &[u64], degree: usize, moduli: &[Modulus]) -> bool {
    components(poly, degree, moduli).all(|(c, m)| c.iter().all(|&x| x < m.value()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub_negate() {
        let moduli = [Modulus::new(17), Modulus::new(13)];
        let mut a = vec![1, 16, 0, 12];
        let b = vec![16, 2, 5, 12];
        add_inplace_p(&mut a, &b, 2, &moduli);
        assert_eq!(a, vec![0, 1, 5, 11]);
        sub_inplace_p(&mut a, &b, 2, &moduli);
        assert_eq!(a, vec![1, 16, 0, 12]);
        negate_inplace_p(&mut a, 2, &moduli);
        assert_eq!(a, vec![16, 1, 0, 1]);
        assert!(is_reduced_p(&a, 2, &moduli));
    }

    #[test]
    fn test_products() {
        let moduli = [Modulus::new(17), Modulus::new(13)];
        let a = vec![3, 4, 5, 6];
        let b = vec![6, 5, 4, 3];
        let mut c = vec![0; 4];
        dyadic_product_p(&a, &b, 2, &moduli, &mut c);
        assert_eq!(c, vec![1, 3, 7, 5]);
        dyadic_product_accumulate_p(&a, &b, 2, &moduli, &mut c);
        assert_eq!(c, vec![2, 6, 1, 10]);
        multiply_scalar_inplace(&mut c[..2], 2, &moduli[0]);
        multiply_scalar_inplace(&mut c[2..], 2, &moduli[1]);
        assert_eq!(c, vec![4, 12, 2, 7]);
    }

    #[test]
    fn test_from_signed() {
        let moduli = [Modulus::new(17), Modulus::new(13)];
        let mut r = vec![0; 4];
        from_signed_p(&[-1, 3], &moduli, &mut r);
        assert_eq!(r, vec![16, 3, 12, 3]);
        assert_eq!(infinity_norm(&r[..2], &moduli[0]), 3);
    }
}

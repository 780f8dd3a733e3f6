use crate::modulus::Modulus;

/// Witnesses making Miller-Rabin deterministic for every 64-bit input.
const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

pub fn gcd(x: u64, y: u64) -> u64 {
    if x < y {
        gcd(y, x)
    } else if y == 0 {
        x
    } else {
        let f = x % y;
        if f == 0 { y } else { gcd(y, f) }
    }
}

/** Extended GCD:
Returns (gcd, x, y) where gcd is the greatest common divisor of a and b.
The numbers x, y are such that gcd = ax + by.
*/
pub fn xgcd(mut x: u64, mut y: u64) -> (u64, i64, i64) {
    let mut prev_a = 1; let mut a = 0;
    let mut prev_b = 0; let mut b = 1;
    while y != 0 {
        let q = (x / y) as i64;
        let mut temp = (x % y) as i64;
        x = y;
        y = temp as u64;
        temp = a;
        a = prev_a - q * a;
        prev_a = temp;
        temp = b;
        b = prev_b - q * b;
        prev_b = temp;
    }
    (x, prev_a, prev_b)
}

#[inline]
pub fn multiply_u64_mod(a: u64, b: u64, modulus: &Modulus) -> u64 {
    modulus.reduce_u128(a as u128 * b as u128)
}

pub fn exponentiate_u64_mod(operand: u64, mut exponent: u64, modulus: &Modulus) -> u64 {
    let mut base = modulus.reduce(operand);
    let mut result = modulus.reduce(1);
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = multiply_u64_mod(result, base, modulus);
        }
        base = multiply_u64_mod(base, base, modulus);
        exponent >>= 1;
    }
    result
}

pub fn try_invert_u64_mod_u64(value: u64, modulus: u64, result: &mut u64) -> bool {
    if value == 0 {return false;}
    let (g, a, _) = xgcd(value, modulus);
    if g != 1 {
        false
    } else if a < 0 {
        *result = (a + modulus as i64) as u64;
        true
    } else {
        *result = a as u64;
        true
    }
}

#[inline]
pub fn try_invert_u64_mod(value: u64, modulus: &Modulus, result: &mut u64) -> bool {
    try_invert_u64_mod_u64(modulus.reduce(value), modulus.value(), result)
}

pub fn is_prime_u64(value: u64) -> bool {
    if value < 2 {return false;}
    for p in MILLER_RABIN_BASES {
        if value == p {return true;}
        if value % p == 0 {return false;}
    }
    let mut d = value - 1;
    let mut r = 0;
    while (d & 1) == 0 {d >>= 1; r += 1;}
    let mulmod = |a: u64, b: u64| ((a as u128 * b as u128) % value as u128) as u64;
    let powmod = |mut a: u64, mut e: u64| {
        let mut acc = 1u64;
        while e > 0 {
            if e & 1 == 1 {acc = mulmod(acc, a);}
            a = mulmod(a, a);
            e >>= 1;
        }
        acc
    };
    'witness: for a in MILLER_RABIN_BASES {
        let mut x = powmod(a, d);
        if x == 1 || x == value - 1 {continue;}
        for _ in 1..r {
            x = mulmod(x, x);
            if x == value - 1 {continue 'witness;}
        }
        return false;
    }
    true
}

#[inline]
pub fn is_prime(modulus: &Modulus) -> bool {
    is_prime_u64(modulus.value())
}

/// Largest primes of exactly `bit_size` bits congruent to 1 modulo `factor`.
pub fn get_primes(factor: u64, bit_size: usize, mut count: usize) -> Vec<Modulus> {
    let mut destination = vec![];
    // Start with (2^bit_size - 1) / factor * factor + 1
    let mut value = ((0x1u64 << bit_size) - 1) / factor * factor + 1;
    let lower_bound = 0x1 << (bit_size - 1);
    while count > 0 && value > lower_bound {
        if is_prime_u64(value) {
            destination.push(Modulus::new(value));
            count -= 1;
        }
        value -= factor;
    }
    if count > 0 {
        panic!("[Logic error] Failed to find enough qualifying primes.");
    }
    destination
}

#[allow(unused)]
pub fn get_prime(factor: u64, bit_size: usize) -> Modulus {
    get_primes(factor, bit_size, 1)[0]
}

/**
Primes congruent to 1 modulo `factor`, taken alternately just above and just
below `2^log_value`. Consecutive rescales by such primes keep the scale of
a ciphertext within a small relative drift of `2^log_value`.
*/
pub fn get_primes_around(factor: u64, log_value: usize, count: usize, exclude: &[u64]) -> Vec<Modulus> {
    let center = 1u64 << log_value;
    let mut upper = center + 1;
    let mut lower = center - factor + 1;
    let mut destination = Vec::with_capacity(count);
    let mut take_upper = true;
    while destination.len() < count {
        let candidate = loop {
            let value = if take_upper {
                let v = upper; upper += factor; v
            } else {
                let v = lower; lower -= factor; v
            };
            if is_prime_u64(value) && !exclude.contains(&value) {
                break value;
            }
        };
        destination.push(Modulus::new(candidate));
        take_upper = !take_upper;
    }
    destination
}

pub fn is_primitive_root(root: u64, degree: u64, modulus: &Modulus) -> bool {
    if root == 0 {
        false
    } else {
        // We check if root is a degree-th root of unity in integers modulo modulus,
        // where degree is a power of two. It suffices to check that root^(degree/2)
        // is -1 modulo modulus.
        exponentiate_u64_mod(root, degree >> 1, modulus) == (modulus.value() - 1)
    }
}

pub fn try_primitive_root(degree: u64, modulus: &Modulus, destination: &mut u64) -> bool {
    let size_entire_group = modulus.value() - 1;
    let size_quotient_group = size_entire_group / degree;
    if size_entire_group - size_quotient_group * degree != 0 {
        return false;
    }
    // Deterministic scan over small bases keeps the tables reproducible.
    for base in 2..modulus.value().min(1 << 20) {
        let candidate = exponentiate_u64_mod(base, size_quotient_group, modulus);
        if is_primitive_root(candidate, degree, modulus) {
            *destination = candidate;
            return true;
        }
    }
    false
}

pub fn try_minimal_primitive_root(degree: u64, modulus: &Modulus, destination: &mut u64) -> bool {
    let mut root = 0;
    if !try_primitive_root(degree, modulus, &mut root) {return false;}
    let generator_sq = multiply_u64_mod(root, root, modulus);
    let mut current_generator = root;
    // destination is going to always contain the smallest generator found
    for _ in 0..((degree+1)/2) {
        if current_generator < root {root = current_generator;}
        current_generator = multiply_u64_mod(current_generator, generator_sq, modulus);
    }
    *destination = root; true
}

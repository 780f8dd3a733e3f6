pub const HE_POLY_MOD_DEGREE_MIN: usize = 2;
pub const HE_POLY_MOD_DEGREE_MAX: usize = 131072;
pub const HE_MOD_BIT_COUNT_MAX: usize = 61;
pub const HE_MOD_BIT_COUNT_MIN: usize = 2;
pub const HE_CIPHERTEXT_SIZE_MIN: usize = 2;
pub const HE_CIPHERTEXT_SIZE_MAX: usize = 16;
pub const HE_PRNG_SEED_BYTES: usize = 64;

#[inline]
pub fn get_significant_bit_count(value: u64) -> usize {
    if value == 0 {0} else {64 - value.leading_zeros() as usize}
}

#[inline]
pub fn get_power_of_two(value: u64) -> isize {
    if value == 0 || (value & (value - 1)) != 0 {-1}
    else {value.trailing_zeros() as isize}
}

#[inline]
pub fn reverse_bits_u32(operand: u32, bit_count: usize) -> u32 {
    if bit_count == 0 {0}
    else {operand.reverse_bits() >> (32 - bit_count)}
}

#[inline]
pub fn reverse_bits_u64(operand: u64, bit_count: usize) -> u64 {
    if bit_count == 0 {0}
    else {operand.reverse_bits() >> (64 - bit_count)}
}

#[inline]
pub fn are_close_f64(value1: f64, value2: f64) -> bool {
    let scale_factor = value1.abs().max(value2.abs()).max(1.0);
    (value1 - value2).abs() < f64::EPSILON * scale_factor
}

#[inline]
pub fn hamming_weight(x: u8) -> i32 {
    x.count_ones() as i32
}

/// Lift a residue in `[0, q)` to the centered interval `(-q/2, q/2]`.
#[inline]
pub fn center_u64(value: u64, modulus: u64) -> i64 {
    if value > (modulus >> 1) {
        -((modulus - value) as i64)
    } else {
        value as i64
    }
}

/// Reduce a signed integer into `[0, q)`.
#[inline]
pub fn reduce_i64(value: i64, modulus: u64) -> u64 {
    if value >= 0 {
        (value as u64) % modulus
    } else {
        let r = value.unsigned_abs() % modulus;
        if r == 0 {0} else {modulus - r}
    }
}

/// Reduce a signed 128-bit integer into `[0, q)`.
#[inline]
pub fn reduce_i128(value: i128, modulus: u64) -> u64 {
    let m = modulus as i128;
    let r = value % m;
    (if r < 0 {r + m} else {r}) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_bits() {
        assert_eq!(reverse_bits_u32(1, 3), 4);
        assert_eq!(reverse_bits_u32(6, 3), 3);
        assert_eq!(reverse_bits_u64(1, 10), 512);
        assert_eq!(reverse_bits_u64(0, 0), 0);
    }

    #[test]
    fn test_center_and_reduce() {
        assert_eq!(center_u64(0, 17), 0);
        assert_eq!(center_u64(8, 17), 8);
        assert_eq!(center_u64(9, 17), -8);
        assert_eq!(center_u64(16, 17), -1);
        assert_eq!(reduce_i64(-1, 17), 16);
        assert_eq!(reduce_i64(-17, 17), 0);
        assert_eq!(reduce_i64(35, 17), 1);
        assert_eq!(reduce_i128(-(1i128 << 70), 17), {
            let r = (1u128 << 70) % 17;
            ((17 - r) % 17) as u64
        });
    }

    #[test]
    fn test_power_of_two() {
        assert_eq!(get_power_of_two(1024), 10);
        assert_eq!(get_power_of_two(1000), -1);
        assert_eq!(get_significant_bit_count(0), 0);
        assert_eq!(get_significant_bit_count(1 << 40), 41);
    }
}

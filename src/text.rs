use crate::HeContext;

/// Struct to store a CKKS plaintext element.
///
/// A plaintext is a single polynomial kept in NTT form with respect to each
/// of the primes `q_0, ..., q_level`, together with the scale its slots were
/// encoded at. The backing array holds `(level + 1) * N` words, component
/// `i` being the residues modulo `q_i`.
///
/// See [Ciphertext] for the class that stores ciphertexts.
#[derive(Clone, Debug)]
pub struct Plaintext {
    poly_modulus_degree: usize,
    level: usize,
    data: Vec<u64>,
    scale: f64,
}

impl Default for Plaintext {
    fn default() -> Self {
        Plaintext { poly_modulus_degree: 0, level: 0, data: vec![], scale: 1.0 }
    }
}

impl Plaintext {

    /// Creates an empty plaintext.
    pub fn new() -> Self {
        Plaintext::default()
    }

    /// Creates a zero plaintext at `level`.
    pub fn zero(context: &HeContext, level: usize, scale: f64) -> Self {
        let mut ret = Self::new();
        ret.resize(context, level);
        ret.scale = scale;
        ret
    }

    /// Resize to `level`, zeroing the data.
    pub fn resize(&mut self, context: &HeContext, level: usize) {
        let degree = context.poly_modulus_degree();
        assert!(level <= context.max_level(), "[Invalid argument] Level out of range.");
        self.poly_modulus_degree = degree;
        self.level = level;
        self.data.clear();
        self.data.resize(degree * (level + 1), 0);
    }

    pub fn level(&self) -> usize {self.level}
    pub fn scale(&self) -> f64 {self.scale}
    pub fn set_scale(&mut self, new_scale: f64) {self.scale = new_scale;}
    pub fn poly_modulus_degree(&self) -> usize {self.poly_modulus_degree}
    pub fn coeff_modulus_size(&self) -> usize {self.level + 1}
    pub fn data(&self) -> &[u64] {&self.data}
    pub fn data_mut(&mut self) -> &mut [u64] {&mut self.data}

    /// Residues modulo `q_index`.
    pub fn component(&self, index: usize) -> &[u64] {
        let d = self.poly_modulus_degree;
        &self.data[index * d..(index + 1) * d]
    }

    pub fn component_mut(&mut self, index: usize) -> &mut [u64] {
        let d = self.poly_modulus_degree;
        &mut self.data[index * d..(index + 1) * d]
    }

    /// Discard the components above `level`.
    pub fn drop_to_level(&mut self, level: usize) {
        assert!(level <= self.level, "[Invalid argument] Cannot raise the level of a plaintext.");
        self.level = level;
        self.data.truncate(self.poly_modulus_degree * (level + 1));
    }

}

/// Struct to store a CKKS ciphertext element.
///
/// A ciphertext consists of `size` polynomials, each kept in NTT form modulo
/// `q_0, ..., q_level`. Freshly encrypted ciphertexts have size 2; a product
/// has size 3 until relinearized. The scale is tracked as an `f64`, and the
/// decryption `c_0 + c_1 s (+ c_2 s^2)` approximates the slots times the
/// scale.
///
/// See [Plaintext] for the class that stores plaintexts.
#[derive(Clone, Debug)]
pub struct Ciphertext {
    size: usize,
    level: usize,
    poly_modulus_degree: usize,
    data: Vec<u64>,
    scale: f64,
}

impl Default for Ciphertext {
    fn default() -> Self {
        Ciphertext {
            size: 0,
            level: 0,
            poly_modulus_degree: 0,
            data: vec![],
            scale: 1.0,
        }
    }
}

impl Ciphertext {

    /// Creates an empty ciphertext.
    pub fn new() -> Self {Self::default()}

    /// Create a ciphertext from raw members.
    pub fn from_members(size: usize, level: usize, poly_modulus_degree: usize, data: Vec<u64>, scale: f64) -> Ciphertext {
        assert_eq!(data.len(), size * (level + 1) * poly_modulus_degree, "[Invalid argument] Data size mismatch.");
        Ciphertext {size, level, poly_modulus_degree, data, scale}
    }

    /// The scale of the ciphertext.
    pub fn scale(&self) -> f64 {self.scale}

    /// Set the scale of the ciphertext.
    pub fn set_scale(&mut self, scale: f64) {self.scale = scale;}

    /// The level `l`: the ciphertext lives modulo `q_0 * ... * q_l`.
    pub fn level(&self) -> usize {self.level}

    /// Number of primes the ciphertext lives under, `level + 1`.
    pub fn coeff_modulus_size(&self) -> usize {self.level + 1}

    /// Number of polynomials, also called the degree of the ciphertext.
    pub fn size(&self) -> usize {self.size}

    pub fn poly_modulus_degree(&self) -> usize {self.poly_modulus_degree}

    pub fn data(&self) -> &[u64] {&self.data}
    pub fn data_mut(&mut self) -> &mut [u64] {&mut self.data}

    /// Resize to `size` polynomials at `level`, zeroing the data.
    pub fn resize(&mut self, context: &HeContext, level: usize, size: usize) {
        assert!(level <= context.max_level(), "[Invalid argument] Level out of range.");
        assert!(size <= crate::util::HE_CIPHERTEXT_SIZE_MAX, "[Invalid argument] Size too large.");
        let degree = context.poly_modulus_degree();
        self.poly_modulus_degree = degree;
        self.level = level;
        self.size = size;
        self.data.clear();
        self.data.resize(size * (level + 1) * degree, 0);
    }

    fn poly_len(&self) -> usize {
        self.poly_modulus_degree * (self.level + 1)
    }

    /// Get the polynomial at `id`.
    pub fn poly(&self, id: usize) -> &[u64] {
        let d = self.poly_len();
        &self.data[id * d..(id + 1) * d]
    }

    pub fn poly_mut(&mut self, id: usize) -> &mut [u64] {
        let d = self.poly_len();
        &mut self.data[id * d..(id + 1) * d]
    }

    /// Polynomials `id_lower..id_upper` as one slice.
    pub fn polys(&self, id_lower: usize, id_upper: usize) -> &[u64] {
        let d = self.poly_len();
        &self.data[id_lower * d..id_upper * d]
    }

    pub fn poly_component_mut(&mut self, poly_id: usize, component_id: usize) -> &mut [u64] {
        let offset = poly_id * self.poly_len() + component_id * self.poly_modulus_degree;
        let d = self.poly_modulus_degree;
        &mut self.data[offset..offset + d]
    }

    /// Discard the primes above `level` without touching the scale.
    pub fn drop_to_level(&mut self, level: usize) {
        assert!(level <= self.level, "[Invalid argument] Cannot raise the level of a ciphertext.");
        if level == self.level {return;}
        let old = self.poly_len();
        let new = self.poly_modulus_degree * (level + 1);
        let mut data = Vec::with_capacity(self.size * new);
        for i in 0..self.size {
            data.extend_from_slice(&self.data[i * old..i * old + new]);
        }
        self.data = data;
        self.level = level;
    }

    /// A ciphertext whose mask polynomials are all zero decrypts without the key.
    pub fn is_transparent(&self) -> bool {
        self.data.is_empty() || self.size < crate::util::HE_CIPHERTEXT_SIZE_MIN
            || (1..self.size).all(|i| self.poly(i).iter().all(|&x| x == 0))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncryptionParameters, SecurityLevel};

    #[test]
    fn test_ciphertext_layout() {
        let context = HeContext::new(EncryptionParameters::ckks(3, 2, 30, 40, 41), SecurityLevel::None).unwrap();
        let mut ct = Ciphertext::new();
        ct.resize(&context, 2, 2);
        assert_eq!(ct.data().len(), 2 * 3 * 8);
        ct.poly_component_mut(1, 2)[0] = 7;
        assert_eq!(ct.poly(1)[16], 7);
        assert!(!ct.is_transparent());
        ct.poly_component_mut(0, 1)[3] = 5;
        ct.drop_to_level(1);
        assert_eq!(ct.level(), 1);
        assert_eq!(ct.coeff_modulus_size(), 2);
        assert_eq!(ct.poly(0)[8 + 3], 5);
        assert!(ct.is_transparent());
    }

    #[test]
    fn test_plaintext_drop() {
        let context = HeContext::new(EncryptionParameters::ckks(3, 2, 30, 40, 41), SecurityLevel::None).unwrap();
        let mut pt = Plaintext::zero(&context, 2, 4.0);
        pt.component_mut(1)[0] = 9;
        pt.drop_to_level(1);
        assert_eq!(pt.data().len(), 16);
        assert_eq!(pt.component(1)[0], 9);
        assert_eq!(pt.scale(), 4.0);
    }
}

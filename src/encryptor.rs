use std::sync::Arc;

use crate::{
    Ciphertext,
    HeContext,
    Plaintext,
    PublicKey,
    SecretKey,
    polymod,
    util::rlwe,
};

/// Encrypts [Plaintext] objects into [Ciphertext] objects.
///
/// Constructing an Encryptor requires a [HeContext] and a [PublicKey] and/or
/// a [SecretKey]. With a public key the asymmetric encryption is used,
/// otherwise the symmetric one. The ciphertext takes the level and scale of
/// the plaintext.
pub struct Encryptor {
    context: Arc<HeContext>,
    public_key: Option<PublicKey>,
    secret_key: Option<SecretKey>,
}

impl Encryptor {

    pub fn new(context: Arc<HeContext>) -> Self {
        Self { context, public_key: None, secret_key: None }
    }

    pub fn set_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self
    }

    pub fn set_secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn context(&self) -> &Arc<HeContext> {&self.context}

    /// Encryption of zero at `level`.
    pub fn encrypt_zero_at(&self, level: usize, destination: &mut Ciphertext) {
        if let Some(public_key) = &self.public_key {
            rlwe::encrypt_zero::asymmetric(public_key, &self.context, level, destination);
        } else if let Some(secret_key) = &self.secret_key {
            rlwe::encrypt_zero::symmetric(secret_key, &self.context, level, destination);
        } else {
            panic!("[Logic error] Encryptor has neither a public nor a secret key.");
        }
    }

    pub fn encrypt(&self, plain: &Plaintext, destination: &mut Ciphertext) {
        let level = plain.level();
        self.encrypt_zero_at(level, destination);
        let n = self.context.poly_modulus_degree();
        polymod::add_inplace_p(destination.poly_mut(0), plain.data(), n, self.context.moduli_at(level));
        destination.set_scale(plain.scale());
    }

    pub fn encrypt_new(&self, plain: &Plaintext) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.encrypt(plain, &mut destination);
        destination
    }

}

/// Decrypts [Ciphertext] objects into [Plaintext] objects.
pub struct Decryptor {
    context: Arc<HeContext>,
    secret_key: SecretKey,
}

impl Decryptor {

    pub fn new(context: Arc<HeContext>, secret_key: SecretKey) -> Self {
        Self { context, secret_key }
    }

    /// `c_0 + c_1 s + c_2 s^2 + ...` at the ciphertext level.
    pub fn decrypt(&self, encrypted: &Ciphertext, destination: &mut Plaintext) {
        let level = encrypted.level();
        let n = self.context.poly_modulus_degree();
        let moduli = self.context.moduli_at(level);
        let s = self.secret_key.data_at(&self.context, level);

        destination.resize(&self.context, level);
        destination.set_scale(encrypted.scale());
        destination.data_mut().copy_from_slice(encrypted.poly(0));

        // Horner: ((c_{k} s + c_{k-1}) s + ...) s + c_0
        let size = encrypted.size();
        if size > 1 {
            let mut acc = encrypted.poly(size - 1).to_vec();
            for i in (1..size - 1).rev() {
                polymod::dyadic_product_inplace_p(&mut acc, s, n, moduli);
                polymod::add_inplace_p(&mut acc, encrypted.poly(i), n, moduli);
            }
            polymod::dyadic_product_inplace_p(&mut acc, s, n, moduli);
            polymod::add_inplace_p(destination.data_mut(), &acc, n, moduli);
        }
    }

    pub fn decrypt_new(&self, encrypted: &Ciphertext) -> Plaintext {
        let mut destination = Plaintext::new();
        self.decrypt(encrypted, &mut destination);
        destination
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CKKSEncoder, EncryptionParameters, KeyGenerator, SecurityLevel};
    use num_complex::Complex;

    #[test]
    fn test_encrypt_decrypt() {
        let context = HeContext::new(EncryptionParameters::ckks(6, 3, 40, 60, 61), SecurityLevel::None).unwrap();
        let keygen = KeyGenerator::new(context.clone());
        let encoder = CKKSEncoder::new(context.clone());
        let values = (0..encoder.slot_count()).map(|i| Complex::new(i as f64 * 0.25, -(i as f64))).collect::<Vec<_>>();
        let plain = encoder.encode_c64_array_new(&values, 2, 2f64.powi(40));

        let asymmetric = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
        let symmetric = Encryptor::new(context.clone()).set_secret_key(keygen.secret_key().clone());
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
        for encryptor in [asymmetric, symmetric] {
            let encrypted = encryptor.encrypt_new(&plain);
            assert_eq!(encrypted.level(), 2);
            assert_eq!(encrypted.size(), 2);
            assert!(!encrypted.is_transparent());
            let decoded = encoder.decode_new(&decryptor.decrypt_new(&encrypted));
            for (a, b) in values.iter().zip(decoded.iter()) {
                assert!((a - b).norm() < 1e-6);
            }
        }
    }
}

use std::io::{Read, Write, Result, Error, ErrorKind};

use crate::{
    util::{self, PRNGSeed, HE_CIPHERTEXT_SIZE_MAX, HE_CIPHERTEXT_SIZE_MIN, HE_PRNG_SEED_BYTES},
    Ciphertext, EncryptionParameters, GaloisKeys, HeContext, KSwitchKey, Modulus,
    Plaintext, PublicKey, RelinKeys, SecretKey,
};

/// Provide serialization and deserialization methods for
/// HE objects without context information.
pub trait Serializable {
    /// Serialize the object into a stream.
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize>;
    /// Deserialize the object from a stream.
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> where Self: Sized;
    /// Get the size (bytes) of the object if serialized.
    fn serialized_size(&self) -> usize;
}

/// Provide serialization and deserialization methods for
/// HE objects relative to an HE context.
pub trait SerializableWithHeContext {
    /// Serialize the object into a stream.
    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize>;
    /// Deserialize the object from a stream.
    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<Self> where Self: Sized;
    /// Get the size (bytes) of the object if serialized.
    fn serialized_size(&self, context: &HeContext) -> usize;
}

fn invalid_data(message: &str) -> Error {
    Error::new(ErrorKind::InvalidData, message.to_string())
}

impl Serializable for u64 {
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        stream.write_all(&self.to_le_bytes())?;
        Ok(8)
    }
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

/// `usize` travels as a little-endian `u64` so both ends agree on the width.
impl Serializable for usize {
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        (*self as u64).serialize(stream)
    }
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        let value = u64::deserialize(stream)?;
        usize::try_from(value).map_err(|_| invalid_data("Length does not fit in usize"))
    }
    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

impl Serializable for u8 {
    #[inline]
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        stream.write_all(&[*self])?;
        Ok(1)
    }
    #[inline]
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf)?;
        Ok(buf[0])
    }
    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u8>()
    }
}

impl Serializable for bool {
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        let value = if *self { 1u8 } else { 0u8 };
        value.serialize(stream)
    }
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        match u8::deserialize(stream)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(invalid_data("Invalid boolean")),
        }
    }
    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u8>()
    }
}

impl Serializable for f64 {
    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        self.to_bits().serialize(stream)
    }
    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        let value = u64::deserialize(stream)?;
        Ok(f64::from_bits(value))
    }
    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

impl Serializable for Modulus {

    fn serialize<T: Write> (&self, stream: &mut T) -> Result<usize> {
        self.value().serialize(stream)
    }

    fn deserialize<T: Read> (stream: &mut T) -> Result<Modulus> {
        let value = u64::deserialize(stream)?;
        if value < 2 {
            return Err(invalid_data("Invalid modulus"));
        }
        Ok(Modulus::new(value))
    }

    fn serialized_size(&self) -> usize {
        std::mem::size_of::<u64>()
    }

}

impl Serializable for PRNGSeed {

    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        stream.write_all(&self.0)?;
        Ok(HE_PRNG_SEED_BYTES)
    }

    fn deserialize<T: Read>(stream: &mut T) -> Result<PRNGSeed> {
        let mut seed = PRNGSeed::default();
        stream.read_exact(&mut seed.0)?;
        Ok(seed)
    }

    fn serialized_size(&self) -> usize {
        HE_PRNG_SEED_BYTES
    }

}

impl<I: Serializable> Serializable for Vec<I> {

    fn serialize<T: Write> (&self, stream: &mut T) -> Result<usize> {
        let mut bytes_written = 0;
        bytes_written += self.len().serialize(stream)?;
        for item in self {
            bytes_written += item.serialize(stream)?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read> (stream: &mut T) -> Result<Vec<I>> {
        let len = usize::deserialize(stream)?;
        // Capacity is bounded so that a corrupt length cannot exhaust memory.
        let mut ret = Vec::with_capacity(len.min(1 << 16));
        for _ in 0..len {
            ret.push(I::deserialize(stream)?);
        }
        Ok(ret)
    }

    fn serialized_size(&self) -> usize {
        let mut size = std::mem::size_of::<u64>();
        for item in self {
            size += item.serialized_size();
        }
        size
    }

}

impl Serializable for EncryptionParameters {

    fn serialize<T: Write> (&self, stream: &mut T) -> Result<usize> {
        let mut bytes_written = 0;
        bytes_written += self.poly_modulus_degree().serialize(stream)?;
        bytes_written += self.coeff_modulus().to_vec().serialize(stream)?;
        bytes_written += self.special_modulus().serialize(stream)?;
        bytes_written += self.random_seed().is_some().serialize(stream)?;
        if let Some(seed) = self.random_seed() {
            bytes_written += seed.serialize(stream)?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read> (stream: &mut T) -> Result<EncryptionParameters> {
        let poly_modulus_degree = usize::deserialize(stream)?;
        let coeff_modulus = Vec::<Modulus>::deserialize(stream)?;
        let special_modulus = Modulus::deserialize(stream)?;
        let random_seed = if bool::deserialize(stream)? {
            Some(PRNGSeed::deserialize(stream)?)
        } else {
            None
        };
        Ok(EncryptionParameters::new()
            .set_poly_modulus_degree(poly_modulus_degree)
            .set_coeff_modulus(&coeff_modulus)
            .set_special_modulus(special_modulus)
            .set_random_seed(random_seed))
    }

    fn serialized_size(&self) -> usize {
        let mut size = 0;
        size += self.poly_modulus_degree().serialized_size();
        size += self.coeff_modulus().to_vec().serialized_size();
        size += self.special_modulus().serialized_size();
        size += 1;
        if let Some(seed) = self.random_seed() {
            size += seed.serialized_size();
        }
        size
    }

}

fn get_u64_limit(value: u64) -> usize {
    let bits = util::get_significant_bit_count(value);
    (bits + 7) / 8
}

#[inline]
fn write_u64_limited<T: Write>(stream: &mut T, value: u64, limit: usize) -> Result<usize> {
    let bytes = value.to_le_bytes();
    if limit < 8 && (value >> (8 * limit)) != 0 {
        return Err(invalid_data("Coefficient exceeds its modulus width"));
    }
    stream.write_all(&bytes[..limit])?;
    Ok(limit)
}

#[inline]
fn read_u64_limited<T: Read>(stream: &mut T, limit: usize) -> Result<u64> {
    let mut bytes = [0u8; 8];
    stream.read_exact(&mut bytes[..limit])?;
    Ok(u64::from_le_bytes(bytes))
}

/// Provide compact serialization of a single RNS polynomial.
///
/// A polynomial with `c` components lives modulo the first `c` key moduli:
/// `c = level + 1` for ciphertext parts and `c = L + 2` for key material.
/// Each coefficient takes as many bytes as its modulus needs.
pub struct PolynomialSerializer {}

impl PolynomialSerializer {

    fn moduli_for(context: &HeContext, component_count: usize) -> Result<&[Modulus]> {
        let key_modulus = context.key_modulus();
        if component_count == 0 || component_count > key_modulus.len() {
            return Err(invalid_data("Invalid component count"));
        }
        Ok(&key_modulus[..component_count])
    }

    /// Serialize a polynomial.
    pub fn serialize_polynomial<T: Write>(context: &HeContext, stream: &mut T, data: &[u64]) -> Result<usize> {
        let degree = context.poly_modulus_degree();
        if data.len() % degree != 0 {
            return Err(invalid_data("Polynomial length is not a multiple of the degree"));
        }
        let component_count = data.len() / degree;
        let moduli = Self::moduli_for(context, component_count)?;
        let mut bytes_written = component_count.serialize(stream)?;
        for (component, modulus) in data.chunks(degree).zip(moduli.iter()) {
            let limit = get_u64_limit(modulus.value());
            for &k in component {
                bytes_written += write_u64_limited(stream, k, limit)?;
            }
        }
        Ok(bytes_written)
    }

    /// Deserialize a polynomial, rejecting unreduced coefficients.
    pub fn deserialize_polynomial<T: Read>(context: &HeContext, stream: &mut T) -> Result<Vec<u64>> {
        let degree = context.poly_modulus_degree();
        let component_count = usize::deserialize(stream)?;
        let moduli = Self::moduli_for(context, component_count)?;
        let mut data = vec![0u64; component_count * degree];
        for (component, modulus) in data.chunks_mut(degree).zip(moduli.iter()) {
            let limit = get_u64_limit(modulus.value());
            for k in component.iter_mut() {
                *k = read_u64_limited(stream, limit)?;
                if *k >= modulus.value() {
                    return Err(invalid_data("Coefficient is not reduced"));
                }
            }
        }
        Ok(data)
    }

    /// Size in bytes if [PolynomialSerializer::serialize_polynomial] is called
    /// with `component_count` components.
    pub fn serialized_polynomial_size(context: &HeContext, component_count: usize) -> usize {
        let degree = context.poly_modulus_degree();
        let moduli = &context.key_modulus()[..component_count.min(context.key_modulus_size())];
        std::mem::size_of::<u64>() + moduli.iter().map(|m| degree * get_u64_limit(m.value())).sum::<usize>()
    }

}

/// Header preceding every serialized ciphertext: `(level, scale, degree)`.
///
/// The scale is written both as its rounded base-2 logarithm and as the
/// exact `f64` bits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CiphertextHeader {
    pub level: usize,
    pub scale_pow2: u8,
    pub scale: f64,
    pub size: usize,
    pub degree: usize,
}

impl CiphertextHeader {

    pub fn of(ciphertext: &Ciphertext) -> Self {
        Self {
            level: ciphertext.level(),
            scale_pow2: ciphertext.scale().log2().round().clamp(0.0, 255.0) as u8,
            scale: ciphertext.scale(),
            size: ciphertext.size(),
            degree: ciphertext.poly_modulus_degree(),
        }
    }

}

impl Serializable for CiphertextHeader {

    fn serialize<T: Write>(&self, stream: &mut T) -> Result<usize> {
        let mut bytes_written = 0;
        bytes_written += self.level.serialize(stream)?;
        bytes_written += self.scale_pow2.serialize(stream)?;
        bytes_written += self.scale.serialize(stream)?;
        bytes_written += self.size.serialize(stream)?;
        bytes_written += self.degree.serialize(stream)?;
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(stream: &mut T) -> Result<Self> {
        Ok(Self {
            level: usize::deserialize(stream)?,
            scale_pow2: u8::deserialize(stream)?,
            scale: f64::deserialize(stream)?,
            size: usize::deserialize(stream)?,
            degree: usize::deserialize(stream)?,
        })
    }

    fn serialized_size(&self) -> usize {
        8 + 1 + 8 + 8 + 8
    }

}

impl SerializableWithHeContext for Ciphertext {

    fn serialize<T: Write> (&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        if self.poly_modulus_degree() != context.poly_modulus_degree() || self.level() > context.max_level() {
            return Err(invalid_data("Ciphertext does not match the context"));
        }
        let mut bytes_written = CiphertextHeader::of(self).serialize(stream)?;
        for i in 0..self.size() {
            bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, self.poly(i))?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<Ciphertext> {
        let header = CiphertextHeader::deserialize(stream)?;
        if header.degree != context.poly_modulus_degree() {
            return Err(invalid_data("Ciphertext degree does not match the context"));
        }
        if header.level > context.max_level() {
            return Err(invalid_data("Ciphertext level out of range"));
        }
        if header.size < HE_CIPHERTEXT_SIZE_MIN || header.size > HE_CIPHERTEXT_SIZE_MAX {
            return Err(invalid_data("Invalid ciphertext size"));
        }
        if !(header.scale.is_finite() && header.scale > 0.0) {
            return Err(invalid_data("Invalid ciphertext scale"));
        }
        let mut data = Vec::with_capacity(header.size * (header.level + 1) * header.degree);
        for _ in 0..header.size {
            let poly = PolynomialSerializer::deserialize_polynomial(context, stream)?;
            if poly.len() != (header.level + 1) * header.degree {
                return Err(invalid_data("Ciphertext polynomial has the wrong level"));
            }
            data.extend(poly);
        }
        Ok(Ciphertext::from_members(header.size, header.level, header.degree, data, header.scale))
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        CiphertextHeader::of(self).serialized_size()
            + self.size() * PolynomialSerializer::serialized_polynomial_size(context, self.coeff_modulus_size())
    }

}

impl SerializableWithHeContext for Plaintext {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        let mut bytes_written = 0;
        bytes_written += self.level().serialize(stream)?;
        bytes_written += self.scale().serialize(stream)?;
        bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, self.data())?;
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<Plaintext> {
        let level = usize::deserialize(stream)?;
        let scale = f64::deserialize(stream)?;
        if level > context.max_level() {
            return Err(invalid_data("Plaintext level out of range"));
        }
        let data = PolynomialSerializer::deserialize_polynomial(context, stream)?;
        let mut ret = Plaintext::zero(context, level, scale);
        if data.len() != ret.data().len() {
            return Err(invalid_data("Plaintext polynomial has the wrong level"));
        }
        ret.data_mut().copy_from_slice(&data);
        Ok(ret)
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        16 + PolynomialSerializer::serialized_polynomial_size(context, self.coeff_modulus_size())
    }

}

/// Secret keys are only written to local storage, never to peers.
impl SerializableWithHeContext for SecretKey {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        PolynomialSerializer::serialize_polynomial(context, stream, self.data())
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<SecretKey> {
        let data = PolynomialSerializer::deserialize_polynomial(context, stream)?;
        if data.len() != context.key_modulus_size() * context.poly_modulus_degree() {
            return Err(invalid_data("Secret key must span every key modulus"));
        }
        Ok(SecretKey::new(data))
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        PolynomialSerializer::serialized_polynomial_size(context, context.key_modulus_size())
    }

}

impl SerializableWithHeContext for PublicKey {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        self.as_ciphertext().serialize(context, stream)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<PublicKey> {
        let ciphertext = Ciphertext::deserialize(context, stream)?;
        Ok(PublicKey::new(ciphertext))
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        self.as_ciphertext().serialized_size(context)
    }

}

impl<I: SerializableWithHeContext> SerializableWithHeContext for Vec<I> {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        let mut bytes_written = 0;
        bytes_written += self.len().serialize(stream)?;
        for item in self.iter() {
            bytes_written += item.serialize(context, stream)?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<Vec<I>> {
        let len = usize::deserialize(stream)?;
        let mut ret = Vec::with_capacity(len.min(1 << 12));
        for _ in 0..len {
            ret.push(I::deserialize(context, stream)?);
        }
        Ok(ret)
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        let mut size = 0;
        size += self.len().serialized_size();
        for item in self.iter() {
            size += item.serialized_size(context);
        }
        size
    }

}

impl SerializableWithHeContext for KSwitchKey {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        let mut bytes_written = self.digit_count().serialize(stream)?;
        for j in 0..self.digit_count() {
            bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, self.b(j))?;
            bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, self.a(j))?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<KSwitchKey> {
        let digit_count = usize::deserialize(stream)?;
        if digit_count != context.max_level() + 1 {
            return Err(invalid_data("Key switching key has the wrong digit count"));
        }
        let full = context.key_modulus_size() * context.poly_modulus_degree();
        let mut digits = Vec::with_capacity(digit_count);
        for _ in 0..digit_count {
            let mut digit = PolynomialSerializer::deserialize_polynomial(context, stream)?;
            let a = PolynomialSerializer::deserialize_polynomial(context, stream)?;
            if digit.len() != full || a.len() != full {
                return Err(invalid_data("Key switching key must span every key modulus"));
            }
            digit.extend(a);
            digits.push(digit);
        }
        Ok(KSwitchKey::from_members(digits))
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        8 + 2 * self.digit_count() * PolynomialSerializer::serialized_polynomial_size(context, context.key_modulus_size())
    }

}

impl SerializableWithHeContext for RelinKeys {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        self.key().serialize(context, stream)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<RelinKeys> {
        Ok(RelinKeys::new(KSwitchKey::deserialize(context, stream)?))
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        self.key().serialized_size(context)
    }

}

impl SerializableWithHeContext for GaloisKeys {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> Result<usize> {
        let elts = self.galois_elts();
        let mut bytes_written = elts.len().serialize(stream)?;
        for elt in elts {
            bytes_written += elt.serialize(stream)?;
            bytes_written += self.key(elt).serialize(context, stream)?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> Result<GaloisKeys> {
        let count = usize::deserialize(stream)?;
        let mut ret = GaloisKeys::new();
        let m = context.poly_modulus_degree() << 1;
        for _ in 0..count {
            let elt = usize::deserialize(stream)?;
            if elt % 2 == 0 || elt >= m {
                return Err(invalid_data("Invalid Galois element"));
            }
            ret.insert(elt, KSwitchKey::deserialize(context, stream)?);
        }
        Ok(ret)
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        self.galois_elts().iter()
            .map(|&elt| 8 + self.key(elt).serialized_size(context))
            .sum::<usize>() + 8
    }

}

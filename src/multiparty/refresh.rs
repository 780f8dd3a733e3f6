use std::io::{Read, Write};
use std::sync::Arc;

use num_complex::Complex;
use rand::{distributions::Uniform, Rng};

use crate::{
    multiparty::participant::Participant,
    serialize::{CiphertextHeader, PolynomialSerializer, Serializable, SerializableWithHeContext},
    util::{rlwe, BlakeRNG, PRNGSeed},
    polymod, CKKSEncoder, Ciphertext, Error, Evaluator, HeContext, Plaintext, Result,
};

/// An R-linear map applied to the slots while they are refreshed.
///
/// Implementations must satisfy `T(x + y) = T(x) + T(y)` for real and
/// imaginary parts separately, since masks are transformed share by share.
pub trait SlotTransform: Send + Sync {
    fn apply(&self, values: &[Complex<f64>]) -> Vec<Complex<f64>>;
}

/// Plain refresh: slots are re-encrypted unchanged.
pub struct IdentityTransform;

impl SlotTransform for IdentityTransform {
    fn apply(&self, values: &[Complex<f64>]) -> Vec<Complex<f64>> {
        values.to_vec()
    }
}

pub type CrpDigest = [u8; 32];

/// What a party (or a subtree, once summed) contributes to one refresh:
/// `h = s c_1 + e - Encode(m)` at the input level and
/// `h' = -s a + e' + Encode(T(m))` at the output level.
#[derive(Clone, Debug)]
pub struct RefreshShare {
    pub input: CiphertextHeader,
    pub output_level: usize,
    pub output_scale: f64,
    pub crp_digest: CrpDigest,
    pub h: Vec<u64>,
    pub h_out: Vec<u64>,
}

impl SerializableWithHeContext for RefreshShare {

    fn serialize<T: Write>(&self, context: &HeContext, stream: &mut T) -> std::io::Result<usize> {
        let mut bytes_written = self.input.serialize(stream)?;
        bytes_written += self.output_level.serialize(stream)?;
        bytes_written += self.output_scale.serialize(stream)?;
        stream.write_all(&self.crp_digest)?;
        bytes_written += self.crp_digest.len();
        bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, &self.h)?;
        bytes_written += PolynomialSerializer::serialize_polynomial(context, stream, &self.h_out)?;
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(context: &HeContext, stream: &mut T) -> std::io::Result<Self> {
        let input = CiphertextHeader::deserialize(stream)?;
        let output_level = usize::deserialize(stream)?;
        let output_scale = f64::deserialize(stream)?;
        let mut crp_digest = [0u8; 32];
        stream.read_exact(&mut crp_digest)?;
        let h = PolynomialSerializer::deserialize_polynomial(context, stream)?;
        let h_out = PolynomialSerializer::deserialize_polynomial(context, stream)?;
        Ok(Self { input, output_level, output_scale, crp_digest, h, h_out })
    }

    fn serialized_size(&self, context: &HeContext) -> usize {
        let n = context.poly_modulus_degree().max(1);
        self.input.serialized_size() + 16 + 32
            + PolynomialSerializer::serialized_polynomial_size(context, self.h.len() / n)
            + PolynomialSerializer::serialized_polynomial_size(context, self.h_out.len() / n)
    }

}

/**
Collective refresh of one ciphertext by masked re-encryption.

Every party masks its decryption share of the tired ciphertext with a
private `m_i` and supplies a fresh encryption share of `T(m_i)` under the
common polynomial `a`. The aggregator decodes `y = x - sum m_i`, which is all
it learns, and outputs `(Encode(T(y)) + sum h'_i, a)`, an encryption of
`T(x)` at the output level.

The common polynomial is expanded from the shared seed, the iteration and
the ciphertext index, so every party derives the same `a` without
communication; its digest travels with each share and a mismatch is a
[Error::SeedDesync].
*/
pub struct RefreshProtocol {
    context: Arc<HeContext>,
    encoder: CKKSEncoder,
    crp: Vec<u64>,
    crp_digest: CrpDigest,
    output_level: usize,
    output_scale: f64,
    mask_bound: f64,
}

impl RefreshProtocol {

    pub fn new(context: Arc<HeContext>, common_seed: &PRNGSeed, iteration: usize, index: usize, output_scale: f64, mask_bound_bits: u32) -> Self {
        let n = context.poly_modulus_degree();
        let output_level = context.max_level();
        let moduli = context.moduli_at(output_level);
        let mut crp = vec![0; n * moduli.len()];
        rlwe::sample::uniform(&mut BlakeRNG::derived(common_seed, &Self::crp_tag(iteration, index)), n, moduli, &mut crp);
        let crp_digest = Self::digest(&crp);
        let encoder = CKKSEncoder::new(context.clone());
        let mask_bound = 2f64.powi(mask_bound_bits as i32);
        Self { context, encoder, crp, crp_digest, output_level, output_scale, mask_bound }
    }

    fn crp_tag(iteration: usize, index: usize) -> Vec<u8> {
        let mut tag = b"refresh".to_vec();
        tag.extend_from_slice(&(iteration as u64).to_le_bytes());
        tag.extend_from_slice(&(index as u64).to_le_bytes());
        tag
    }

    fn digest(crp: &[u64]) -> CrpDigest {
        let mut hasher = blake3::Hasher::new();
        crp.iter().for_each(|x| {hasher.update(&x.to_le_bytes());});
        *hasher.finalize().as_bytes()
    }

    pub fn crp_digest(&self) -> &CrpDigest {&self.crp_digest}
    pub fn output_level(&self) -> usize {self.output_level}

    fn sample_mask(&self, rng: &mut BlakeRNG) -> Vec<Complex<f64>> {
        let distribution = Uniform::new_inclusive(-self.mask_bound, self.mask_bound);
        (0..self.encoder.slot_count())
            .map(|_| Complex::new(rng.sample(distribution), rng.sample(distribution)))
            .collect()
    }

    fn transformed(&self, transform: &dyn SlotTransform, values: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut out = transform.apply(values);
        out.truncate(self.encoder.slot_count());
        out
    }

    pub fn share(&self, participant: &Participant, cipher: &Ciphertext, transform: &dyn SlotTransform) -> RefreshShare {
        assert_eq!(cipher.size(), 2, "[Invalid argument] Refresh needs a relinearized ciphertext.");
        let context = &self.context;
        let n = context.poly_modulus_degree();
        let s = participant.secret_key();
        let mut rng = participant.context().create_random_generator();
        let mask = self.sample_mask(&mut rng);

        let level = cipher.level();
        let moduli = context.moduli_at(level);
        let mut h = participant.smudging_noise_ntt(level);
        let mut product = vec![0; h.len()];
        polymod::dyadic_product_p(cipher.poly(1), s.data_at(context, level), n, moduli, &mut product);
        polymod::add_inplace_p(&mut h, &product, n, moduli);
        let encoded = self.encoder.encode_c64_array_new(&mask, level, cipher.scale());
        polymod::sub_inplace_p(&mut h, encoded.data(), n, moduli);

        let out_moduli = context.moduli_at(self.output_level);
        let mut h_out = participant.noise_ntt(out_moduli, context.ntt_tables_at(self.output_level));
        let mut product = vec![0; h_out.len()];
        polymod::dyadic_product_p(&self.crp, s.data_at(context, self.output_level), n, out_moduli, &mut product);
        polymod::sub_inplace_p(&mut h_out, &product, n, out_moduli);
        let encoded = self.encoder.encode_c64_array_new(&self.transformed(transform, &mask), self.output_level, self.output_scale);
        polymod::add_inplace_p(&mut h_out, encoded.data(), n, out_moduli);

        RefreshShare {
            input: CiphertextHeader::of(cipher),
            output_level: self.output_level,
            output_scale: self.output_scale,
            crp_digest: self.crp_digest,
            h,
            h_out,
        }
    }

    /// Validate the share of `sender` against this round.
    pub fn check(&self, share: &RefreshShare, cipher: &Ciphertext, sender: usize) -> Result<()> {
        if share.crp_digest != self.crp_digest {
            return Err(Error::SeedDesync { party: sender });
        }
        let expected = CiphertextHeader::of(cipher);
        let n = self.context.poly_modulus_degree();
        if share.input.level != expected.level
            || share.input.degree != expected.degree
            || share.output_level != self.output_level
            || share.h.len() != (expected.level + 1) * n
            || share.h_out.len() != (self.output_level + 1) * n
        {
            return Err(Error::ShareMismatch(format!(
                "refresh share of party {} is for level {} -> {}, round is {} -> {}",
                sender, share.input.level, share.output_level, expected.level, self.output_level
            )));
        }
        if !Evaluator::scales_match(share.input.scale, expected.scale) || !Evaluator::scales_match(share.output_scale, self.output_scale) {
            return Err(Error::ShareMismatch(format!(
                "refresh share of party {} has scale {:.4e}, round has {:.4e}",
                sender, share.input.scale, expected.scale
            )));
        }
        Ok(())
    }

    /// Add the checked share of `sender` into `aggregate`.
    pub fn aggregate(&self, aggregate: &mut RefreshShare, share: &RefreshShare, cipher: &Ciphertext, sender: usize) -> Result<()> {
        self.check(share, cipher, sender)?;
        let n = self.context.poly_modulus_degree();
        polymod::add_inplace_p(&mut aggregate.h, &share.h, n, self.context.moduli_at(share.input.level));
        polymod::add_inplace_p(&mut aggregate.h_out, &share.h_out, n, self.context.moduli_at(self.output_level));
        Ok(())
    }

    /// Combine the summed shares of all parties into the refreshed ciphertext.
    pub fn finish(&self, cipher: &Ciphertext, aggregate: &RefreshShare, transform: &dyn SlotTransform) -> Result<Ciphertext> {
        self.check(aggregate, cipher, 0)?;
        let context = &self.context;
        let n = context.poly_modulus_degree();
        let level = cipher.level();
        let moduli = context.moduli_at(level);

        let mut masked = Plaintext::zero(context, level, cipher.scale());
        masked.data_mut().copy_from_slice(cipher.poly(0));
        polymod::add_inplace_p(masked.data_mut(), &aggregate.h, n, moduli);
        let y = self.encoder.decode_new(&masked);

        let out_moduli = context.moduli_at(self.output_level);
        let encoded = self.encoder.encode_c64_array_new(&self.transformed(transform, &y), self.output_level, self.output_scale);
        let mut data = encoded.data().to_vec();
        polymod::add_inplace_p(&mut data, &aggregate.h_out, n, out_moduli);
        data.extend_from_slice(&self.crp);
        log::debug!("[refresh] level {} -> {}, scale 2^{:.2}", level, self.output_level, self.output_scale.log2());
        Ok(Ciphertext::from_members(2, self.output_level, n, data, self.output_scale))
    }

}

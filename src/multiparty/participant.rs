use std::sync::Arc;

use crate::{
    util::{rlwe, BlakeRNG, NTTTables, PRNGSeed},
    polymod, Ciphertext, Error, GaloisKeys, HeContext, KSwitchKey, KeyGenerator, Modulus,
    Plaintext, PublicKey, RelinKeys, Result, SecretKey,
};

/// Standard deviation of the smudging noise added to decryption shares.
pub const SMUDGING_STANDARD_DEVIATION: f64 = 3.2 * 1024.0;

/// One party of the multiparty scheme: a secret share `s_i` and the seed
/// shared by all parties, from which common reference polynomials are
/// expanded.
pub struct Participant {
    context: Arc<HeContext>,
    secret_key: SecretKey,
    common_seed: PRNGSeed,
    pub participant_count: usize,
    pub participant_id: usize,
}

impl Participant {

    /// Samples a fresh ternary secret share from the context generator.
    pub fn new(context: Arc<HeContext>, common_seed: PRNGSeed, participant_count: usize, participant_id: usize) -> Self {
        assert!(participant_id < participant_count, "[Invalid argument] Participant id out of range.");
        let mut rng = context.create_random_generator();
        let secret_key = KeyGenerator::sample_secret(&context, &mut rng);
        Self { context, secret_key, common_seed, participant_count, participant_id }
    }

    pub fn context(&self) -> &Arc<HeContext> {&self.context}
    pub fn secret_key(&self) -> &SecretKey {&self.secret_key}
    pub fn common_seed(&self) -> &PRNGSeed {&self.common_seed}

    /// Common random stream for `tag`; identical at every party.
    pub fn common_rng(&self, tag: &[u8]) -> BlakeRNG {
        BlakeRNG::derived(&self.common_seed, tag)
    }

    pub(crate) fn noise_ntt(&self, moduli: &[Modulus], ntt_tables: &[NTTTables]) -> Vec<u64> {
        let n = self.context.poly_modulus_degree();
        let mut prng = self.context.create_random_generator();
        let mut noise = vec![0; n * moduli.len()];
        rlwe::sample::centered_binomial(&mut prng, n, moduli, &mut noise);
        polymod::ntt_p(&mut noise, n, ntt_tables);
        noise
    }

    pub(crate) fn smudging_noise_ntt(&self, level: usize) -> Vec<u64> {
        let n = self.context.poly_modulus_degree();
        let moduli = self.context.moduli_at(level);
        let mut prng = self.context.create_random_generator();
        let mut noise = vec![0; n * moduli.len()];
        rlwe::sample::clipped_normal(&mut prng, SMUDGING_STANDARD_DEVIATION, n, moduli, &mut noise);
        polymod::ntt_p(&mut noise, n, self.context.ntt_tables_at(level));
        noise
    }

}

/// Sums polynomial shares in sender order once every expected share arrived.
pub struct PolynomialRevelationProtocol {
    moduli: Vec<Modulus>,
    degree: usize,
    broadcasted: Vec<Option<Vec<u64>>>,
}

impl PolynomialRevelationProtocol {

    pub fn new(moduli: &[Modulus], degree: usize, sender_count: usize) -> Self {
        Self { moduli: moduli.to_vec(), degree, broadcasted: vec![None; sender_count] }
    }

    pub fn receive(&mut self, sender_id: usize, share: Vec<u64>) -> Result<()> {
        if sender_id >= self.broadcasted.len() {
            return Err(Error::Protocol(format!("unexpected share from party {}", sender_id)));
        }
        if share.len() != self.degree * self.moduli.len() {
            return Err(Error::ShareMismatch(format!(
                "share of party {} has {} coefficients, expected {}",
                sender_id, share.len(), self.degree * self.moduli.len()
            )));
        }
        if self.broadcasted[sender_id].is_some() {
            return Err(Error::Protocol(format!("duplicate share from party {}", sender_id)));
        }
        self.broadcasted[sender_id] = Some(share);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.broadcasted.iter().all(|x| x.is_some())
    }

    /// Sum of all shares, taken in sender order.
    pub fn finish(self) -> Result<Vec<u64>> {
        let mut result = vec![0; self.degree * self.moduli.len()];
        for (sender_id, share) in self.broadcasted.into_iter().enumerate() {
            match share {
                Some(share) => polymod::add_inplace_p(&mut result, &share, self.degree, &self.moduli),
                None => return Err(Error::Protocol(format!("missing share from party {}", sender_id))),
            }
        }
        Ok(result)
    }

}

/// Collective public key generation: `pk = (sum_i -s_i a + e_i, a)`.
pub struct PublicKeyGenerationProtocol {
    context: Arc<HeContext>,
    crp: Vec<u64>,
    p0_reveal: PolynomialRevelationProtocol,
}

impl PublicKeyGenerationProtocol {

    pub fn new(context: Arc<HeContext>, common_seed: &PRNGSeed, participant_count: usize) -> Self {
        let n = context.poly_modulus_degree();
        let level = context.max_level();
        let moduli = context.moduli_at(level);
        let mut crp = vec![0; n * moduli.len()];
        rlwe::sample::uniform(&mut BlakeRNG::derived(common_seed, b"ckg"), n, moduli, &mut crp);
        let p0_reveal = PolynomialRevelationProtocol::new(moduli, n, participant_count);
        Self { context, crp, p0_reveal }
    }

    pub fn share(&self, participant: &Participant) -> Vec<u64> {
        let context = &self.context;
        let n = context.poly_modulus_degree();
        let level = context.max_level();
        let moduli = context.moduli_at(level);
        let mut share = participant.noise_ntt(moduli, context.ntt_tables_at(level));
        let mut product = vec![0; share.len()];
        polymod::dyadic_product_p(&self.crp, participant.secret_key().data_at(context, level), n, moduli, &mut product);
        polymod::sub_inplace_p(&mut share, &product, n, moduli);
        share
    }

    pub fn receive(&mut self, sender_id: usize, share: Vec<u64>) -> Result<()> {
        self.p0_reveal.receive(sender_id, share)
    }

    pub fn finish(self) -> Result<PublicKey> {
        let n = self.context.poly_modulus_degree();
        let level = self.context.max_level();
        let mut data = self.p0_reveal.finish()?;
        data.extend_from_slice(&self.crp);
        Ok(PublicKey::new(Ciphertext::from_members(2, level, n, data, 1.0)))
    }

}

/// A share of either round of the relinearization key generation: one pair
/// of polynomials over all key moduli per decomposition digit.
#[derive(Clone, Debug)]
pub struct RelinKeysShare {
    pub h0: Vec<Vec<u64>>,
    pub h1: Vec<Vec<u64>>,
}

impl RelinKeysShare {

    pub fn add_inplace(&mut self, other: &RelinKeysShare, context: &HeContext) -> Result<()> {
        if self.h0.len() != other.h0.len() || self.h1.len() != other.h1.len() {
            return Err(Error::ShareMismatch("relinearization shares differ in digit count".into()));
        }
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        for (x, y) in self.h0.iter_mut().zip(other.h0.iter()).chain(self.h1.iter_mut().zip(other.h1.iter())) {
            if x.len() != y.len() {
                return Err(Error::ShareMismatch("relinearization shares differ in size".into()));
            }
            polymod::add_inplace_p(x, y, n, moduli);
        }
        Ok(())
    }

}

/// Party side of the two-round relinearization key generation. Holds the
/// ephemeral ternary secret `u_i` between the rounds.
pub struct RelinKeysGenerationParty<'a> {
    participant: &'a Participant,
    u: Vec<u64>,
}

impl<'a> RelinKeysGenerationParty<'a> {

    pub fn new(participant: &'a Participant) -> Self {
        let context = participant.context();
        let mut rng = context.create_random_generator();
        let u = KeyGenerator::sample_secret(context, &mut rng).data().to_vec();
        Self { participant, u }
    }

    /// `h0_j = -u a_j + p s [j] + e`, `h1_j = s a_j + e`.
    pub fn round1_share(&self, crp: &[Vec<u64>]) -> RelinKeysShare {
        let context = self.participant.context();
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let tables = context.key_ntt_tables();
        let s = self.participant.secret_key().data();
        let mut h0 = Vec::with_capacity(crp.len());
        let mut h1 = Vec::with_capacity(crp.len());
        for (j, a) in crp.iter().enumerate() {
            let mut product = vec![0; a.len()];
            let mut share0 = self.participant.noise_ntt(moduli, tables);
            polymod::dyadic_product_p(a, &self.u, n, moduli, &mut product);
            polymod::sub_inplace_p(&mut share0, &product, n, moduli);
            let mut scaled = vec![0; n];
            polymod::multiply_scalar(&s[j * n..(j + 1) * n], context.special_mod_q()[j], &moduli[j], &mut scaled);
            polymod::add_inplace(&mut share0[j * n..(j + 1) * n], &scaled, &moduli[j]);
            h0.push(share0);

            let mut share1 = self.participant.noise_ntt(moduli, tables);
            polymod::dyadic_product_p(a, s, n, moduli, &mut product);
            polymod::add_inplace_p(&mut share1, &product, n, moduli);
            h1.push(share1);
        }
        RelinKeysShare { h0, h1 }
    }

    /// `h0'_j = s H0_j + e`, `h1'_j = (u - s) H1_j + e` on the round-one sums.
    pub fn round2_share(&self, round1: &RelinKeysShare) -> RelinKeysShare {
        let context = self.participant.context();
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let tables = context.key_ntt_tables();
        let s = self.participant.secret_key().data();
        let mut u_minus_s = self.u.clone();
        polymod::sub_inplace_p(&mut u_minus_s, s, n, moduli);

        let mut h0 = Vec::with_capacity(round1.h0.len());
        let mut h1 = Vec::with_capacity(round1.h1.len());
        for (big_h0, big_h1) in round1.h0.iter().zip(round1.h1.iter()) {
            let mut product = vec![0; big_h0.len()];
            let mut share0 = self.participant.noise_ntt(moduli, tables);
            polymod::dyadic_product_p(big_h0, s, n, moduli, &mut product);
            polymod::add_inplace_p(&mut share0, &product, n, moduli);
            h0.push(share0);

            let mut share1 = self.participant.noise_ntt(moduli, tables);
            polymod::dyadic_product_p(big_h1, &u_minus_s, n, moduli, &mut product);
            polymod::add_inplace_p(&mut share1, &product, n, moduli);
            h1.push(share1);
        }
        RelinKeysShare { h0, h1 }
    }

}

/// Aggregator side of the relinearization key generation.
pub struct RelinKeysGenerationProtocol {
    context: Arc<HeContext>,
    crp: Vec<Vec<u64>>,
    round1: Option<RelinKeysShare>,
    round2: Option<RelinKeysShare>,
}

impl RelinKeysGenerationProtocol {

    pub fn new(context: Arc<HeContext>, common_seed: &PRNGSeed) -> Self {
        let n = context.poly_modulus_degree();
        let moduli = context.key_modulus();
        let mut rng = BlakeRNG::derived(common_seed, b"rkg");
        let crp = (0..=context.max_level()).map(|_| {
            let mut a = vec![0; n * moduli.len()];
            rlwe::sample::uniform(&mut rng, n, moduli, &mut a);
            a
        }).collect();
        Self { context, crp, round1: None, round2: None }
    }

    pub fn crp(&self) -> &[Vec<u64>] {&self.crp}

    fn accumulate(slot: &mut Option<RelinKeysShare>, share: &RelinKeysShare, context: &HeContext) -> Result<()> {
        match slot.as_mut() {
            None => *slot = Some(share.clone()),
            Some(sum) => sum.add_inplace(share, context)?,
        }
        Ok(())
    }

    pub fn receive_round1(&mut self, share: &RelinKeysShare) -> Result<()> {
        Self::accumulate(&mut self.round1, share, &self.context)
    }

    /// Aggregated round-one shares, broadcast before round two.
    pub fn round1_result(&self) -> Result<&RelinKeysShare> {
        self.round1.as_ref().ok_or_else(|| Error::Protocol("relinearization round one is empty".into()))
    }

    pub fn receive_round2(&mut self, share: &RelinKeysShare) -> Result<()> {
        Self::accumulate(&mut self.round2, share, &self.context)
    }

    /// `rlk_j = (sum h0'_j + sum h1'_j, H1_j)`.
    pub fn finish(self) -> Result<RelinKeys> {
        let n = self.context.poly_modulus_degree();
        let moduli = self.context.key_modulus();
        let round1 = self.round1.ok_or_else(|| Error::Protocol("relinearization round one is empty".into()))?;
        let round2 = self.round2.ok_or_else(|| Error::Protocol("relinearization round two is empty".into()))?;
        let digits = round2.h0.into_iter().zip(round2.h1.iter()).zip(round1.h1.into_iter())
            .map(|((mut b, h1_prime), a)| {
                polymod::add_inplace_p(&mut b, h1_prime, n, moduli);
                b.extend(a);
                b
            })
            .collect();
        Ok(RelinKeys::new(KSwitchKey::from_members(digits)))
    }

}

/// Collective rotation key generation. Every party builds its key switching
/// key share with the common mask polynomials, so shares add up to a key for
/// the sum of the secrets.
pub struct RotationKeysGenerationProtocol {
    context: Arc<HeContext>,
    galois_elts: Vec<usize>,
    result: Option<GaloisKeys>,
}

impl RotationKeysGenerationProtocol {

    pub fn new(context: Arc<HeContext>, galois_elts: &[usize]) -> Self {
        let m = context.poly_modulus_degree() << 1;
        for &elt in galois_elts {
            assert!(elt % 2 == 1 && elt < m, "[Invalid argument] Invalid Galois element.");
        }
        Self { context, galois_elts: galois_elts.to_vec(), result: None }
    }

    fn crp_tag(galois_elt: usize) -> Vec<u8> {
        let mut tag = b"rtg".to_vec();
        tag.extend_from_slice(&(galois_elt as u64).to_le_bytes());
        tag
    }

    pub fn share(&self, participant: &Participant) -> GaloisKeys {
        let context = participant.context();
        let mut keys = GaloisKeys::new();
        for &elt in &self.galois_elts {
            let rotated = KeyGenerator::rotated_secret(context, participant.secret_key(), elt);
            let mut a_prng = participant.common_rng(&Self::crp_tag(elt));
            keys.insert(elt, KeyGenerator::generate_kswitch_key_with_a_prng(context, participant.secret_key(), &rotated, &mut a_prng));
        }
        keys
    }

    /// Adds the `b` halves; the `a` halves must agree.
    pub fn receive(&mut self, sender_id: usize, share: GaloisKeys) -> Result<()> {
        let mut expected = self.galois_elts.clone();
        expected.sort_unstable();
        expected.dedup();
        if share.galois_elts() != expected {
            return Err(Error::ShareMismatch(format!("rotation key share of party {} has other elements", sender_id)));
        }
        let merged = match &self.result {
            None => share,
            Some(current) => self.merge(current, &share, sender_id)?,
        };
        self.result = Some(merged);
        Ok(())
    }

    fn merge(&self, current: &GaloisKeys, share: &GaloisKeys, sender_id: usize) -> Result<GaloisKeys> {
        let n = self.context.poly_modulus_degree();
        let moduli = self.context.key_modulus();
        let half = n * moduli.len();
        let mut merged = GaloisKeys::new();
        for elt in share.galois_elts() {
            let mine = current.key(elt);
            let theirs = share.key(elt);
            if mine.digit_count() != theirs.digit_count() {
                return Err(Error::ShareMismatch(format!("rotation key share of party {} has other digits", sender_id)));
            }
            let mut digits = mine.data().to_vec();
            for (j, digit) in digits.iter_mut().enumerate() {
                if theirs.a(j) != &digit[half..] {
                    return Err(Error::SeedDesync { party: sender_id });
                }
                polymod::add_inplace_p(&mut digit[..half], theirs.b(j), n, moduli);
            }
            merged.insert(elt, KSwitchKey::from_members(digits));
        }
        Ok(merged)
    }

    pub fn finish(self) -> Result<GaloisKeys> {
        self.result.ok_or_else(|| Error::Protocol("no rotation key shares received".into()))
    }

}

/// Collective decryption: party `i` reveals `s_i c_1 + e_i` with smudging
/// noise, and `c_0` plus all shares is the plaintext.
pub struct DecryptionProtocol {
    context: Arc<HeContext>,
    cipher: Ciphertext,
    h_reveal: PolynomialRevelationProtocol,
}

impl DecryptionProtocol {

    pub fn new(context: Arc<HeContext>, cipher: Ciphertext, participant_count: usize) -> Self {
        assert_eq!(cipher.size(), 2, "[Invalid argument] Collective decryption needs a relinearized ciphertext.");
        let h_reveal = PolynomialRevelationProtocol::new(context.moduli_at(cipher.level()), context.poly_modulus_degree(), participant_count);
        Self { context, cipher, h_reveal }
    }

    pub fn share(&self, participant: &Participant) -> Vec<u64> {
        let context = &self.context;
        let n = context.poly_modulus_degree();
        let level = self.cipher.level();
        let moduli = context.moduli_at(level);
        let mut share = participant.smudging_noise_ntt(level);
        let mut product = vec![0; share.len()];
        polymod::dyadic_product_p(self.cipher.poly(1), participant.secret_key().data_at(context, level), n, moduli, &mut product);
        polymod::add_inplace_p(&mut share, &product, n, moduli);
        share
    }

    pub fn receive(&mut self, sender_id: usize, share: Vec<u64>) -> Result<()> {
        self.h_reveal.receive(sender_id, share)
    }

    pub fn finish(self) -> Result<Plaintext> {
        let n = self.context.poly_modulus_degree();
        let level = self.cipher.level();
        let mut plain = Plaintext::zero(&self.context, level, self.cipher.scale());
        plain.data_mut().copy_from_slice(self.cipher.poly(0));
        let sum = self.h_reveal.finish()?;
        polymod::add_inplace_p(plain.data_mut(), &sum, n, self.context.moduli_at(level));
        Ok(plain)
    }

}

/// Keys of a whole simulated party set, generated through the collective
/// protocols in party order.
pub struct CollectiveKeys {
    pub public_key: PublicKey,
    pub relin_keys: RelinKeys,
    pub galois_keys: GaloisKeys,
}

impl CollectiveKeys {

    pub fn generate(context: Arc<HeContext>, participants: &[Participant], galois_elts: &[usize]) -> Result<Self> {
        let first = participants.first().ok_or_else(|| Error::Config("no participants".into()))?;
        let seed = *first.common_seed();
        let count = participants.len();

        let mut ckg = PublicKeyGenerationProtocol::new(context.clone(), &seed, count);
        for p in participants {
            ckg.receive(p.participant_id, ckg.share(p))?;
        }
        let public_key = ckg.finish()?;

        let mut rkg = RelinKeysGenerationProtocol::new(context.clone(), &seed);
        let parties = participants.iter().map(RelinKeysGenerationParty::new).collect::<Vec<_>>();
        for party in &parties {
            let share = party.round1_share(rkg.crp());
            rkg.receive_round1(&share)?;
        }
        let round1 = rkg.round1_result()?.clone();
        for party in &parties {
            rkg.receive_round2(&party.round2_share(&round1))?;
        }
        let relin_keys = rkg.finish()?;

        let mut rtg = RotationKeysGenerationProtocol::new(context, galois_elts);
        for p in participants {
            rtg.receive(p.participant_id, rtg.share(p))?;
        }
        let galois_keys = rtg.finish()?;

        log::info!("[keys] collective keys ready: {} parties, {} rotation keys", count, galois_keys.len());
        Ok(Self { public_key, relin_keys, galois_keys })
    }

}

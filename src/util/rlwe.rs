pub mod sample {
    use crate::{Modulus, util::{self, he_standard_params}};
    pub const NOISE_STANDARD_DEVIATION: f64 = he_standard_params::HE_HE_STANDARD_PARAMS_ERROR_STD_DEV;
    pub const NOISE_DISTRIBUTION_WITH_MULTIPLIER: f64 = 6.0;
    pub const NOISE_MAX_DEVIATION: f64 = NOISE_STANDARD_DEVIATION * NOISE_DISTRIBUTION_WITH_MULTIPLIER;

    use rand::{Rng, distributions::Uniform, prelude::Distribution};

    #[derive(Clone, Copy)]
    pub struct ClippedNormal {
        normal: rand_distr::Normal<f64>,
        max_deviation: f64,
    }

    impl Distribution<f64> for ClippedNormal {
        fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
            let mean = self.normal.mean();
            loop {
                let sample = self.normal.sample(rng);
                if (sample - mean).abs() <= self.max_deviation {
                    break sample;
                }
            }
        }
    }

    impl ClippedNormal {
        pub fn new(mean: f64, standard_deviation: f64, max_deviation: f64) -> Self {
            assert!(max_deviation > 0.0, "[Invalid argument] Max deviation must be positive.");
            assert!(standard_deviation > 0.0, "[Invalid argument] Standard deviation must be positive.");
            let normal = match rand_distr::Normal::new(mean, standard_deviation) {
                Ok(normal) => normal,
                Err(_) => panic!("[Invalid argument] Standard deviation is not finite."),
            };
            Self { normal, max_deviation }
        }
    }

    #[inline]
    fn spread(sampled: i64, index: usize, degree: usize, moduli: &[Modulus], destination: &mut [u64]) {
        for (j, modulus) in moduli.iter().enumerate() {
            destination[index + j * degree] = modulus.reduce_i64(sampled);
        }
    }

    pub fn ternary<T: Rng>(rng: &mut T, degree: usize, moduli: &[Modulus], destination: &mut [u64]) {
        let distribution = Uniform::new_inclusive(-1i64, 1);
        for i in 0..degree {
            let sampled = rng.sample(distribution);
            spread(sampled, i, degree, moduli, destination);
        }
    }

    pub fn centered_binomial<T: Rng>(rng: &mut T, degree: usize, moduli: &[Modulus], destination: &mut [u64]) {
        if !util::are_close_f64(3.2, NOISE_STANDARD_DEVIATION) {
            panic!("[Logic error] centered binomial distribution only supports standard deviation 3.2; use clipped normal instead.");
        }

        let cbd = |rng: &mut T| {
            let mut x = [0; 6];
            rng.fill_bytes(&mut x);
            x[2] &= 0x1f; x[5] &= 0x1f;
            util::hamming_weight(x[0]) + util::hamming_weight(x[1]) + util::hamming_weight(x[2])
            - util::hamming_weight(x[3]) - util::hamming_weight(x[4]) - util::hamming_weight(x[5])
        };

        for i in 0..degree {
            let sampled = cbd(rng) as i64;
            spread(sampled, i, degree, moduli, destination);
        }
    }

    /// Rounded Gaussian clipped at six deviations. Used for decryption smudging.
    pub fn clipped_normal<T: Rng>(rng: &mut T, standard_deviation: f64, degree: usize, moduli: &[Modulus], destination: &mut [u64]) {
        let distribution = ClippedNormal::new(
            0.0, standard_deviation, standard_deviation * NOISE_DISTRIBUTION_WITH_MULTIPLIER
        );
        for i in 0..degree {
            let sampled = rng.sample(distribution).round() as i64;
            spread(sampled, i, degree, moduli, destination);
        }
    }

    pub fn uniform<T: Rng>(rng: &mut T, degree: usize, moduli: &[Modulus], destination: &mut [u64]) {
        for (j, modulus) in moduli.iter().enumerate() {
            let distribution = Uniform::new_inclusive(0, modulus.value() - 1);
            for i in 0..degree {
                destination[i + j * degree] = rng.sample(distribution);
            }
        }
    }

}

pub mod encrypt_zero {

    use crate::{
        PublicKey,
        HeContext,
        Ciphertext,
        polymod, SecretKey, util::BlakeRNG,
    };
    use super::sample;

    /// `(pk_0 u + e_0, pk_1 u + e_1)` at `level`, NTT form.
    pub fn asymmetric_with_u_prng(
        public_key: &PublicKey, context: &HeContext,
        level: usize, u_prng: &mut BlakeRNG,
        destination: &mut Ciphertext
    ) {
        let coeff_modulus = context.moduli_at(level);
        let coeff_count = context.poly_modulus_degree();
        let ntt_tables = context.ntt_tables_at(level);
        let public_key = public_key.as_ciphertext();
        let encrypted_size = public_key.size();
        let len = coeff_count * coeff_modulus.len();

        destination.resize(context, level, encrypted_size);
        destination.set_scale(1.0);

        let mut prng = context.create_random_generator();

        // u <-- R_3
        let mut u = vec![0; len];
        sample::ternary(u_prng, coeff_count, coeff_modulus, &mut u);
        polymod::ntt_p(&mut u, coeff_count, ntt_tables);
        for j in 0..encrypted_size {
            polymod::dyadic_product_p(&u, &public_key.poly(j)[..len], coeff_count, coeff_modulus, destination.poly_mut(j));
        }

        // e[j] <-- chi, reusing u
        for j in 0..encrypted_size {
            sample::centered_binomial(&mut prng, coeff_count, coeff_modulus, &mut u);
            polymod::ntt_p(&mut u, coeff_count, ntt_tables);
            polymod::add_inplace_p(destination.poly_mut(j), &u, coeff_count, coeff_modulus);
        }
    }

    pub fn asymmetric(public_key: &PublicKey, context: &HeContext, level: usize, destination: &mut Ciphertext) {
        let mut prng = context.create_random_generator();
        asymmetric_with_u_prng(public_key, context, level, &mut prng, destination);
    }

    /// `(-(a s + e), a)` at `level` where `a` is expanded from `c1_prng`.
    pub fn symmetric_with_c1_prng(
        secret_key: &SecretKey, context: &HeContext,
        level: usize, c1_prng: &mut BlakeRNG,
        destination: &mut Ciphertext
    ) {
        let coeff_modulus = context.moduli_at(level);
        let coeff_count = context.poly_modulus_degree();
        let ntt_tables = context.ntt_tables_at(level);
        let len = coeff_count * coeff_modulus.len();

        destination.resize(context, level, 2);
        destination.set_scale(1.0);

        let mut bootstrap_prng = context.create_random_generator();

        // a is sampled directly in NTT form
        sample::uniform(c1_prng, coeff_count, coeff_modulus, destination.poly_mut(1));

        let mut noise = vec![0; len];
        sample::centered_binomial(&mut bootstrap_prng, coeff_count, coeff_modulus, &mut noise);
        polymod::ntt_p(&mut noise, coeff_count, ntt_tables);

        let mut c0 = vec![0; len];
        polymod::dyadic_product_p(&secret_key.data()[..len], destination.poly(1), coeff_count, coeff_modulus, &mut c0);
        polymod::add_inplace_p(&mut c0, &noise, coeff_count, coeff_modulus);
        polymod::negate_inplace_p(&mut c0, coeff_count, coeff_modulus);
        destination.poly_mut(0).copy_from_slice(&c0);
    }

    pub fn symmetric(secret_key: &SecretKey, context: &HeContext, level: usize, destination: &mut Ciphertext) {
        let mut c1_prng = context.create_random_generator();
        symmetric_with_c1_prng(secret_key, context, level, &mut c1_prng, destination);
    }

}

#[cfg(test)]
mod tests {
    use super::sample;
    use crate::{Modulus, util::{self, BlakeRNG, PRNGSeed}};
    use rand::SeedableRng;

    #[test]
    fn test_sample_ranges() {
        let moduli = [Modulus::new(97), Modulus::new(193)];
        let degree = 256;
        let mut rng = BlakeRNG::from_seed(PRNGSeed::from_u64(1));
        let mut dest = vec![0; degree * 2];

        sample::ternary(&mut rng, degree, &moduli, &mut dest);
        for i in 0..degree {
            let a = util::center_u64(dest[i], 97);
            assert!((-1..=1).contains(&a));
            assert_eq!(a, util::center_u64(dest[i + degree], 193));
        }

        sample::centered_binomial(&mut rng, degree, &moduli, &mut dest);
        assert!(dest[..degree].iter().all(|&x| util::center_u64(x, 97).abs() <= 21));

        sample::clipped_normal(&mut rng, 8.0, degree, &moduli, &mut dest);
        assert!(dest[..degree].iter().all(|&x| util::center_u64(x, 97).abs() <= 48));

        sample::uniform(&mut rng, degree, &moduli, &mut dest);
        assert!(dest[..degree].iter().all(|&x| x < 97));
        assert!(dest[degree..].iter().all(|&x| x < 193));
    }
}

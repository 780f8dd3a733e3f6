use std::sync::atomic::{AtomicU64, Ordering};

use rand::{SeedableRng, RngCore};
use rand_chacha::ChaCha20Rng;
use crate::util::basic::HE_PRNG_SEED_BYTES;

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PRNGSeed(pub [u8; HE_PRNG_SEED_BYTES]);

impl Default for PRNGSeed {
    fn default() -> Self {
        PRNGSeed([0; HE_PRNG_SEED_BYTES])
    }
}

impl std::fmt::Debug for PRNGSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PRNGSeed({:02x?}..)", &self.0[..4])
    }
}

impl AsMut<[u8]> for PRNGSeed {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for PRNGSeed {
    fn as_ref(self: &PRNGSeed) -> &[u8] {&self.0}
}

impl PRNGSeed {

    /// Expand a short numeric seed into a full seed.
    pub fn from_u64(value: u64) -> Self {
        Self::derive(&PRNGSeed::default(), &value.to_le_bytes())
    }

    /**
    Derive a child seed bound to `tag`. Parties holding the same parent
    seed derive identical children, which is how common reference
    polynomials are agreed upon without communication.
    */
    pub fn derive(parent: &PRNGSeed, tag: &[u8]) -> Self {
        let mut hash = blake3::Hasher::new();
        hash.update(parent.as_ref());
        hash.update(&(tag.len() as u64).to_le_bytes());
        hash.update(tag);
        let mut out = [0; HE_PRNG_SEED_BYTES];
        hash.finalize_xof().fill(&mut out);
        PRNGSeed(out)
    }

}

/// Hands out independent [BlakeRNG] streams.
///
/// A randomized factory draws every seed from the OS entropy source. A
/// seeded factory derives the n-th stream from its seed and a counter, so a
/// whole run replays exactly when the factory seed is fixed.
pub struct BlakeRNGFactory {
    use_random_seed: bool,
    seed: PRNGSeed,
    counter: AtomicU64,
}

impl Default for BlakeRNGFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BlakeRNGFactory {
    pub fn new() -> Self {
        Self {
            use_random_seed: true,
            seed: PRNGSeed::default(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn from_seed(seed: PRNGSeed) -> Self {
        Self {
            use_random_seed: false,
            seed,
            counter: AtomicU64::new(0),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        !self.use_random_seed
    }

    pub fn get_rng(&self) -> BlakeRNG {
        if self.use_random_seed {
            let mut seed = [0; HE_PRNG_SEED_BYTES];
            ChaCha20Rng::from_entropy().fill_bytes(&mut seed);
            BlakeRNG::from_seed(PRNGSeed(seed))
        } else {
            let index = self.counter.fetch_add(1, Ordering::Relaxed);
            BlakeRNG::from_seed(PRNGSeed::derive(&self.seed, &index.to_le_bytes()))
        }
    }
}

const BUFFER_SIZE: usize = 4096;

pub struct BlakeRNG {
    buffer: [u8; BUFFER_SIZE],
    seed: PRNGSeed,
    counter: u64,
    buffer_current: usize,
}

impl SeedableRng for BlakeRNG {
    type Seed = PRNGSeed;

    fn from_seed(seed: Self::Seed) -> Self {
        Self {
            seed,
            counter: 0,
            buffer: [0; BUFFER_SIZE],
            buffer_current: BUFFER_SIZE,
        }
    }

}

impl BlakeRNG {

    /// Stream bound to `tag` under a shared seed.
    pub fn derived(seed: &PRNGSeed, tag: &[u8]) -> Self {
        Self::from_seed(PRNGSeed::derive(seed, tag))
    }

    fn refill_buffer(&mut self) {
        let mut hash = blake3::Hasher::new();
        hash.update(self.seed.as_ref());
        hash.update(&self.counter.to_le_bytes());
        hash.finalize_xof().fill(&mut self.buffer);
        self.buffer_current = 0;
        self.counter = self.counter.wrapping_add(1);
    }

    fn take<const K: usize>(&mut self) -> [u8; K] {
        if self.buffer_current + K > BUFFER_SIZE {
            self.refill_buffer();
        }
        let mut out = [0; K];
        out.copy_from_slice(&self.buffer[self.buffer_current..self.buffer_current + K]);
        self.buffer_current += K;
        out
    }

}

impl RngCore for BlakeRNG {

    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take::<4>())
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take::<8>())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut i = 0;
        while i < dest.len() {
            if self.buffer_current >= BUFFER_SIZE {
                self.refill_buffer();
            }
            let len = std::cmp::min(dest.len() - i, BUFFER_SIZE - self.buffer_current);
            dest[i..i+len].copy_from_slice(&self.buffer[self.buffer_current..self.buffer_current+len]);
            i += len;
            self.buffer_current += len;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake_rng() {
        let mut rng = BlakeRNG::from_seed(PRNGSeed([1; 64]));
        let mut rng2 = BlakeRNG::from_seed(PRNGSeed([1; 64]));
        for _ in 0..1000 {
            assert_eq!(rng.next_u32(), rng2.next_u32());
            assert_eq!(rng.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_derived_streams() {
        let parent = PRNGSeed::from_u64(7);
        let mut a = BlakeRNG::derived(&parent, b"crp");
        let mut b = BlakeRNG::derived(&parent, b"crp");
        let mut c = BlakeRNG::derived(&parent, b"rtg");
        let x = a.next_u64();
        assert_eq!(x, b.next_u64());
        assert_ne!(x, c.next_u64());
        assert_ne!(PRNGSeed::from_u64(7), PRNGSeed::from_u64(8));
    }

    #[test]
    fn test_seeded_factory_streams_differ_but_replay() {
        let factory = BlakeRNGFactory::from_seed(PRNGSeed([1; 64]));
        let x = factory.get_rng().next_u64();
        let y = factory.get_rng().next_u64();
        assert_ne!(x, y);

        let replay = BlakeRNGFactory::from_seed(PRNGSeed([1; 64]));
        assert_eq!(x, replay.get_rng().next_u64());
        assert_eq!(y, replay.get_rng().next_u64());
        assert!(replay.is_deterministic());
    }

    #[test]
    fn test_blake_rng_factory_randomized() {
        let factory = BlakeRNGFactory::new();
        let mut rng = factory.get_rng();
        let mut rng2 = factory.get_rng();
        assert_ne!(rng.next_u64(), rng2.next_u64());
    }

}

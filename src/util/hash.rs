use sha2::Digest;

const HASH_BLOCK_U64_COUNT: usize = 4;

pub type HashBlock = [u64; HASH_BLOCK_U64_COUNT];

pub const HASH_ZERO_BLOCK: HashBlock = [0; HASH_BLOCK_U64_COUNT];

/// SHA-256 of a word slice, words taken little endian.
#[inline]
pub fn hash(input: &[u64], destination: &mut HashBlock) {
    let mut hasher = sha2::Sha256::new();
    input.iter().for_each(|x| hasher.update(x.to_le_bytes()));
    *destination = to_block(&hasher.finalize());
}

pub fn hash_bytes(input: &[u8]) -> HashBlock {
    to_block(&sha2::Sha256::digest(input))
}

fn to_block(out: &[u8]) -> HashBlock {
    let mut block = HASH_ZERO_BLOCK;
    for (b, chunk) in block.iter_mut().zip(out.chunks(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *b = u64::from_le_bytes(word);
    }
    block
}

/// Hex rendering used in log lines.
pub fn hex(block: &HashBlock) -> String {
    block.iter().map(|x| format!("{:016x}", x.swap_bytes())).collect()
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_hash() {
        let data = [1u64, 2, 3, 4, 5, 6, 7, 8];
        let mut hashed = HASH_ZERO_BLOCK;
        hash(&data, &mut hashed);
        assert_eq!(
            hashed,
            [0xc91516ef25e48a80, 0x800f0651aad1f12c, 0x52396646e3748df1, 0xfa6485cfcd94ff4e],
        );
        let bytes = data.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
        assert_eq!(hash_bytes(&bytes), hashed);
    }

    #[test]
    fn test_hex() {
        let digest = hash_bytes(b"");
        assert_eq!(hex(&digest), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }
}

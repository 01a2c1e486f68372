//! Keccak-256 hashing for headers, diffs and state commitments.

use dsync_types::{BlockHash, Hash256};
use sha3::{Digest, Keccak256};

/// Keccak-256 of the empty input.
pub const EMPTY_HASH: Hash256 = Hash256::new([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Compute the Keccak-256 hash of arbitrary data.
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    finish(hasher)
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn keccak256_multi(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

fn finish(hasher: Keccak256) -> Hash256 {
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    Hash256::new(output)
}

/// Hash a serialized header to produce its `BlockHash`.
pub fn hash_block(header_bytes: &[u8]) -> BlockHash {
    BlockHash::from(keccak256(header_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_vector() {
        assert_eq!(keccak256(b""), EMPTY_HASH);
    }

    #[test]
    fn known_vector() {
        let expected: Hash256 = "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
            .parse()
            .unwrap();
        assert_eq!(keccak256(b"hello"), expected);
    }

    #[test]
    fn multi_equivalent() {
        let single = keccak256(b"helloworld");
        let multi = keccak256_multi(&[b"hello", b"world"]);
        assert_eq!(single, multi);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(keccak256(b"hello"), keccak256(b"world"));
    }

    #[test]
    fn hash_block_wraps_keccak() {
        let h = hash_block(b"header");
        assert_eq!(h.as_bytes(), keccak256(b"header").as_bytes());
    }
}

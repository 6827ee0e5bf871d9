//! BLAKE2b hashing at the three output widths the protocol uses: 256 bits
//! for file/content digests and the traffic secret, 384 bits for rekey key
//! derivation, and the full 512 bits for the handshake transcript.

use blake2::digest::consts::{U32, U48, U64};
use blake2::{Blake2b, Digest};

pub type Blake2b256 = Blake2b<U32>;
pub type Blake2b384 = Blake2b<U48>;
pub type Blake2b512 = Blake2b<U64>;

pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn blake2b384(data: &[u8]) -> [u8; 48] {
    let mut hasher = Blake2b384::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn blake2b512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental BLAKE2b-256 hasher for streamed file content.
pub struct FileHasher(Blake2b256);

impl FileHasher {
    pub fn new() -> Self {
        FileHasher(Blake2b256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl Default for FileHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_digest_is_stable() {
        let h = FileHasher::new();
        let digest = h.finalize();
        assert_eq!(digest, blake2b256(b""));
    }

    #[test]
    fn streamed_hash_matches_one_shot() {
        let mut h = FileHasher::new();
        h.update(b"hello, ");
        h.update(b"world");
        assert_eq!(h.finalize(), blake2b256(b"hello, world"));
    }
}

//! SHA-256 content tags.
//!
//! The server hashes the whole body up front and advertises the digest in
//! the `X-Content-SHA256` header; the client feeds body bytes through an
//! incremental context as they arrive and compares the final digest with
//! the advertised tag. Both sides use lowercase hex.

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over a streamed body.
pub struct ContentDigest {
    hasher: Sha256,
}

impl ContentDigest {
    pub fn new() -> ContentDigest {
        ContentDigest {
            hasher: Sha256::new(),
        }
    }

    /// Feed the next body chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finalize and return the digest as 64 lowercase hex characters.
    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot SHA-256 of a complete body, hex lowercase.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn streaming_equals_one_shot() {
        let data: Vec<u8> = (0u32..100_000).map(|i| (i % 251) as u8).collect();

        let mut digest = ContentDigest::new();
        for chunk in data.chunks(8192) {
            digest.update(chunk);
        }

        assert_eq!(digest.finish_hex(), sha256_hex(&data));
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(1000);

        let mut by_ones = ContentDigest::new();
        for b in &data {
            by_ones.update(std::slice::from_ref(b));
        }

        let mut halves = ContentDigest::new();
        halves.update(&data[..data.len() / 2]);
        halves.update(&data[data.len() / 2..]);

        assert_eq!(by_ones.finish_hex(), halves.finish_hex());
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let tag = sha256_hex(b"quicfile");
        assert_eq!(tag.len(), 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

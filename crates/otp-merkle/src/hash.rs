//! hash functions used by authentication trees
//!
//! the tree hash is pluggable; commit, params and verification hashes are
//! always keccak256 because the ledger recomputes them natively.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

pub type Hash = [u8; 32];

/// hash function applied to eotps (leaves) and sibling pairs (inner nodes)
pub trait Hasher: Send + Sync {
    fn hash(&self, data: &[u8]) -> Hash;

    fn hash_siblings(&self, left: &Hash, right: &Hash) -> Hash {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left);
        buf[32..].copy_from_slice(right);
        self.hash(&buf)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn hash(&self, data: &[u8]) -> Hash {
        Sha256::digest(data).into()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Keccak256Hasher;

impl Hasher for Keccak256Hasher {
    fn hash(&self, data: &[u8]) -> Hash {
        keccak256(&[data])
    }
}

/// keccak256 over the concatenation of `parts`
pub fn keccak256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub(crate) fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(Sha256Hasher.hash(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak_parts_concatenate() {
        assert_eq!(keccak256(&[&b"ab"[..], &b"c"[..]]), keccak256(&[&b"abc"[..]]));
        assert_eq!(Keccak256Hasher.hash(b"abc"), keccak256(&[&b"a"[..], &b"bc"[..]]));
    }

    #[test]
    fn test_hash_siblings_is_ordered() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(Sha256Hasher.hash_siblings(&a, &b), Sha256Hasher.hash_siblings(&b, &a));
    }
}

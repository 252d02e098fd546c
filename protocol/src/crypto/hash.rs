//! # Hashing Utilities
//!
//! Every identifier in Murmur is a 32-byte digest wrapped in [`Hash256`]:
//! block ids, transaction ids, gossip message ids, Merkle roots.
//!
//! - **BLAKE3** hashes block headers, Merkle trees and gossip message ids.
//! - **double SHA-256** hashes the canonical transaction bytes into the
//!   transaction id.
//!
//! Both are deterministic and collision resistant, which is all consensus
//! and gossip need from them. Neither layer looks inside a digest except for
//! proof-of-work, which reads the block id as a big-endian integer.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Hash256
// ---------------------------------------------------------------------------

/// A 32-byte digest.
///
/// Ordering is lexicographic over the raw bytes, which is the same as
/// comparing the digests as big-endian integers. Fork choice relies on this
/// for its tie-break.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero digest. Used as the parent of genesis and as the root of
    /// an empty Merkle tree.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Borrows the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// Hash Functions
// ---------------------------------------------------------------------------

/// SHA-256 of the input as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `SHA-256(SHA-256(data))`. Transaction ids use this construction.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// BLAKE3 of the input.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hashes several byte slices in sequence without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// BLAKE3 in `derive_key` mode with a context string.
///
/// Two different contexts never collide even over identical data, so a
/// transaction and a block can never share a gossip message id.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Binary Merkle root over leaf digests.
///
/// Odd levels duplicate their last node. An empty leaf set yields
/// [`Hash256::ZERO`]; a single leaf is paired with itself so the root is
/// always an interior hash.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut level: Vec<[u8; 32]> = leaves.iter().map(|h| h.0).collect();
    if level.len() == 1 {
        return Hash256(blake3_hash_multi(&[level[0].as_slice(), level[0].as_slice()]));
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let left = &chunk[0];
            let right = chunk.get(1).unwrap_or(left);
            next.push(blake3_hash_multi(&[left.as_slice(), right.as_slice()]));
        }
        level = next;
    }

    Hash256(level[0])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! # Cryptographic Primitives
//!
//! Thin wrappers over audited crates. Consensus and gossip treat everything
//! here as a black box:
//!
//! - **Ed25519** (`ed25519-dalek`) for transaction signatures.
//! - **BLAKE3** for block ids, Merkle roots and gossip message ids.
//! - **double SHA-256** (`sha2`) for transaction ids.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, double_sha256, merkle_root, sha256, Hash256};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
pub use signatures::{sign, verify, verify_hex, SignatureError};

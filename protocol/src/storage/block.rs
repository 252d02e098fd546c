//! # Block Structure
//!
//! A block is a proof-of-work header plus an ordered transaction list.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BlockHeader                                 │
//! │  ├── hash: BlockId         (BLAKE3 of header)│
//! │  ├── parent_hash: BlockId                    │
//! │  ├── height: u64                             │
//! │  ├── timestamp: u64        (Unix ms)         │
//! │  ├── difficulty: u64                         │
//! │  ├── merkle_root: Hash256                    │
//! │  ├── miner: String         (reward address)  │
//! │  └── nonce: u64                              │
//! ├──────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block id is `BLAKE3(tag || height || parent || timestamp || difficulty
//! || merkle_root || len(miner) || miner || nonce)`. The nonce is placed last
//! so the miner can build the prefix once and only rewrite the final eight
//! bytes per attempt (see [`BlockHeader::pow_prefix`]).
//!
//! ## Merkle Root
//!
//! A binary BLAKE3 tree over the transaction ids. Genesis instead commits to
//! its initial allocations so that two networks with different allocations
//! never share a genesis id.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{blake3_hash, merkle_root, Hash256};
use crate::storage::state::GenesisAllocation;
use crate::transaction::{Transaction, TxId};

/// Block ids are header hashes.
pub type BlockId = Hash256;

const HEADER_DOMAIN_TAG: &[u8] = b"murmur/block/v1";

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Everything that the proof-of-work commits to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Cached header hash; must equal [`BlockHeader::compute_hash`].
    pub hash: BlockId,
    /// Id of the parent block. [`Hash256::ZERO`] for genesis.
    pub parent_hash: BlockId,
    /// Distance from genesis (genesis = 0).
    pub height: u64,
    /// Unix milliseconds at which the template was built.
    pub timestamp: u64,
    /// Expected number of hash attempts to find a valid nonce.
    pub difficulty: u64,
    /// Merkle root over the transaction ids.
    pub merkle_root: Hash256,
    /// Address credited with the block reward.
    pub miner: String,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header bytes up to, but excluding, the nonce.
    pub fn pow_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_DOMAIN_TAG.len() + 128 + self.miner.len());
        buf.extend_from_slice(HEADER_DOMAIN_TAG);
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(self.parent_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&(self.miner.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.miner.as_bytes());
        buf
    }

    /// Recomputes the header hash from the current fields.
    pub fn compute_hash(&self) -> BlockId {
        let mut preimage = self.pow_prefix();
        preimage.extend_from_slice(&self.nonce.to_le_bytes());
        Hash256(blake3_hash(&preimage))
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A header plus its ordered transactions. Immutable once mined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The fixed root of every chain sharing these parameters.
    ///
    /// Genesis carries no transactions and is never proof-of-work checked.
    /// Its merkle root commits to `allocations` instead.
    pub fn genesis(timestamp: u64, difficulty: u64, allocations: &[GenesisAllocation]) -> Self {
        let mut header = BlockHeader {
            hash: Hash256::ZERO,
            parent_hash: Hash256::ZERO,
            height: 0,
            timestamp,
            difficulty,
            merkle_root: allocation_root(allocations),
            miner: String::new(),
            nonce: 0,
        };
        header.hash = header.compute_hash();
        Block {
            header,
            transactions: Vec::new(),
        }
    }

    /// An unmined block extending `parent`, nonce zero.
    ///
    /// The cached hash is filled in but will almost certainly not meet the
    /// difficulty target until a miner searches for a nonce.
    pub fn template(
        parent: &BlockHeader,
        transactions: Vec<Transaction>,
        miner: String,
        timestamp: u64,
        difficulty: u64,
    ) -> Self {
        let mut header = BlockHeader {
            hash: Hash256::ZERO,
            parent_hash: parent.hash,
            height: parent.height + 1,
            timestamp,
            difficulty,
            merkle_root: compute_merkle_root(&transactions),
            miner,
            nonce: 0,
        };
        header.hash = header.compute_hash();
        Block {
            header,
            transactions,
        }
    }

    /// The block id.
    pub fn id(&self) -> BlockId {
        self.header.hash
    }

    pub fn parent_id(&self) -> BlockId {
        self.header.parent_hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transaction_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }

    /// Checks the cached hash and the merkle root against the content.
    ///
    /// Does not check proof-of-work or anything that depends on the parent.
    pub fn verify(&self) -> Result<(), String> {
        let expected_hash = self.header.compute_hash();
        if self.header.hash != expected_hash {
            return Err(format!(
                "block {} hash mismatch: stored={}, computed={}",
                self.header.height,
                self.header.hash.short(),
                expected_hash.short(),
            ));
        }

        if self.header.height > 0 {
            let expected_root = compute_merkle_root(&self.transactions);
            if self.header.merkle_root != expected_root {
                return Err(format!(
                    "block {} merkle root mismatch: stored={}, computed={}",
                    self.header.height,
                    self.header.merkle_root.short(),
                    expected_root.short(),
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Merkle Roots
// ---------------------------------------------------------------------------

/// Merkle root over the transaction ids, in block order.
pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash256 {
    let leaves: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
    merkle_root(&leaves)
}

fn allocation_root(allocations: &[GenesisAllocation]) -> Hash256 {
    let leaves: Vec<Hash256> = allocations
        .iter()
        .map(|a| {
            let mut buf = Vec::with_capacity(a.address.len() + 8);
            buf.extend_from_slice(a.address.as_bytes());
            buf.extend_from_slice(&a.amount.to_le_bytes());
            Hash256(blake3_hash(&buf))
        })
        .collect();
    merkle_root(&leaves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::transaction::signed_transfer;

    fn sample_txs(n: u64) -> Vec<Transaction> {
        let kp = Keypair::from_seed(&[5u8; 32]);
        (1..=n).map(|i| signed_transfer(&kp, "bb", i, i)).collect()
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis(0, 1, &[]);
        let b = Block::genesis(0, 1, &[]);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.height(), 0);
        assert_eq!(a.parent_id(), Hash256::ZERO);
        a.verify().unwrap();
    }

    #[test]
    fn genesis_commits_to_allocations() {
        let plain = Block::genesis(0, 1, &[]);
        let funded = Block::genesis(
            0,
            1,
            &[GenesisAllocation {
                address: "aa".into(),
                amount: 100,
            }],
        );
        assert_ne!(plain.id(), funded.id());
    }

    #[test]
    fn template_links_to_parent() {
        let genesis = Block::genesis(0, 1, &[]);
        let block = Block::template(&genesis.header, sample_txs(3), "miner".into(), 10, 1);
        assert_eq!(block.parent_id(), genesis.id());
        assert_eq!(block.height(), 1);
        assert_eq!(block.tx_count(), 3);
        block.verify().unwrap();
    }

    #[test]
    fn nonce_changes_the_id() {
        let genesis = Block::genesis(0, 1, &[]);
        let mut block = Block::template(&genesis.header, vec![], "m".into(), 10, 1);
        let before = block.header.compute_hash();
        block.header.nonce = 1;
        assert_ne!(before, block.header.compute_hash());
    }

    #[test]
    fn tampered_transactions_fail_verification() {
        let genesis = Block::genesis(0, 1, &[]);
        let mut block = Block::template(&genesis.header, sample_txs(2), "m".into(), 10, 1);
        block.transactions.pop();
        assert!(block.verify().unwrap_err().contains("merkle"));
    }

    #[test]
    fn stale_cached_hash_fails_verification() {
        let genesis = Block::genesis(0, 1, &[]);
        let mut block = Block::template(&genesis.header, vec![], "m".into(), 10, 1);
        block.header.timestamp += 1;
        assert!(block.verify().unwrap_err().contains("hash mismatch"));
    }

    #[test]
    fn miner_length_prefix_prevents_ambiguity() {
        let genesis = Block::genesis(0, 1, &[]);
        let a = Block::template(&genesis.header, vec![], "ab".into(), 10, 1);
        let b = Block::template(&genesis.header, vec![], "a".into(), 10, 1);
        assert_ne!(a.id(), b.id());
    }
}
